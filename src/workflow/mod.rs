pub mod document_flow;
pub mod pipeline_ctx;
pub mod report;

pub use document_flow::DocumentFlow;
pub use pipeline_ctx::PipelineCtx;
pub use report::RunReport;
