//! 流水线上下文
//!
//! 持有处理一个文档所需的全部外部客户端，显式传给每个阶段

use std::sync::Arc;

use crate::config::Config;
use crate::infrastructure::{
    CompletionService, PageRasterizer, QuestionStore, RecognitionService, SourceFetcher,
};
use crate::services::{ServiceCaller, WarnWriter};

pub struct PipelineCtx {
    pub config: Config,
    pub fetcher: Arc<dyn SourceFetcher>,
    pub rasterizer: Arc<dyn PageRasterizer>,
    pub recognition: Arc<dyn RecognitionService>,
    pub store: Arc<dyn QuestionStore>,
    /// 补全服务调用（带重试与调用间隔）
    pub caller: ServiceCaller,
    pub warn_writer: WarnWriter,
}

impl PipelineCtx {
    pub fn new(
        config: Config,
        fetcher: Arc<dyn SourceFetcher>,
        rasterizer: Arc<dyn PageRasterizer>,
        recognition: Arc<dyn RecognitionService>,
        completion: Arc<dyn CompletionService>,
        store: Arc<dyn QuestionStore>,
    ) -> Self {
        let caller = ServiceCaller::new(completion, config.retry_policy(), config.inter_call_delay());
        let warn_writer = WarnWriter::with_path(config.warn_file.clone());
        Self {
            config,
            fetcher,
            rasterizer,
            recognition,
            store,
            caller,
            warn_writer,
        }
    }
}
