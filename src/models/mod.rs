pub mod document;
pub mod letter;
pub mod page;
pub mod question;
pub mod records;

pub use document::{DocumentKey, DocumentMeta};
pub use letter::{InvalidLetter, Letter, LetterSet};
pub use page::{Batch, PageSection};
pub use question::{PropositionCandidate, QuestionCandidate};
pub use records::{DocumentRecord, NewProposition, NewQuestion, PropositionRecord, QuestionRecord};
