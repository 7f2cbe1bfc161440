//! 基础设施层（Infrastructure Layer）
//!
//! 持有外部协作方的客户端，只暴露能力：
//! - `completion` - 生成式补全服务接口
//! - `recognition` - 识别服务（OCR）
//! - `source` - 源文档下载与页面栅格化
//! - `store` - 关系型存储（SQLite / 内存）

pub mod completion;
pub mod recognition;
pub mod source;
pub mod store;

pub use completion::{CompletionRequest, CompletionService, ImageInput, ModelTier};
pub use recognition::{MistralOcrClient, RecognitionService};
pub use source::{FetchedSource, HttpFetcher, PageRasterizer, PdftoppmRasterizer, SourceFetcher};
pub use store::{MemoryStore, QuestionStore, SqliteStore};
