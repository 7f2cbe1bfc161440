pub mod answer_resolver;
pub mod batch_planner;
pub mod caller;
pub mod llm_service;
pub mod markers;
pub mod metadata;
pub mod proposition_extractor;
pub mod question_extractor;
pub mod reconciliation;
pub mod schema;
pub mod segmenter;
pub mod transcriber;
pub mod warn_writer;

pub use answer_resolver::{AnswerResolver, DetectorKind, Resolution};
pub use caller::ServiceCaller;
pub use llm_service::LlmService;
pub use metadata::MetadataExtractor;
pub use proposition_extractor::PropositionExtractor;
pub use question_extractor::{QuestionExtractor, QuestionExtractorSettings};
pub use reconciliation::Reconciler;
pub use transcriber::{QualityGate, Transcriber};
pub use warn_writer::{WarnKind, WarnWriter};
