//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 初始化客户端和存储，驱动单个文档的处理，输出统计。
//!
//! ## 层次关系
//!
//! ```text
//! orchestrator::App (持有 PipelineCtx)
//!     ↓
//! workflow::DocumentFlow (处理一份文档)
//!     ↓
//! services (能力层：分页 / 抽取 / 判定 / 对账)
//!     ↓
//! infrastructure (基础设施：补全 / 识别 / 下载 / 存储)
//! ```

pub mod app;

pub use app::App;
