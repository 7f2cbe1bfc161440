//! 应用入口 - 编排层
//!
//! ## 职责
//!
//! 1. **应用初始化**：日志文件、存储、各外部客户端
//! 2. **运行**：把一个源文档交给 `DocumentFlow`
//! 3. **统计**：无论成功与否都输出最终统计
//!
//! 只有这里创建客户端；流程层和能力层通过 `PipelineCtx` 使用它们。

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::config::Config;
use crate::error::AppError;
use crate::infrastructure::source::filename_from_url;
use crate::infrastructure::{
    HttpFetcher, MemoryStore, MistralOcrClient, PdftoppmRasterizer, QuestionStore, SqliteStore,
};
use crate::services::LlmService;
use crate::utils::logging;
use crate::workflow::{DocumentFlow, PipelineCtx, RunReport};

/// 应用主结构
pub struct App {
    ctx: PipelineCtx,
    dry_run: bool,
}

impl App {
    /// 初始化应用
    ///
    /// `dry_run` 为 true 时使用内存存储，不写数据库。
    pub async fn initialize(config: Config, dry_run: bool) -> Result<Self> {
        logging::init_log_file(&config.output_log_file)
            .with_context(|| format!("无法初始化日志文件 {}", config.output_log_file))?;

        let store: Arc<dyn QuestionStore> = if dry_run {
            Arc::new(MemoryStore::new())
        } else {
            let store = SqliteStore::open(Path::new(&config.database_path))
                .with_context(|| format!("无法打开数据库 {}", config.database_path))?;
            info!("🗄️ 已连接数据库: {}", config.database_path);
            Arc::new(store)
        };

        let completion = Arc::new(LlmService::new(&config));
        let recognition = Arc::new(MistralOcrClient::new(&config));
        let fetcher = Arc::new(HttpFetcher::new(config.work_dir.clone()));
        let rasterizer = Arc::new(PdftoppmRasterizer::new());

        let ctx = PipelineCtx::new(config, fetcher, rasterizer, recognition, completion, store);
        Ok(Self { ctx, dry_run })
    }

    /// 使用已经组装好的上下文
    pub fn with_ctx(ctx: PipelineCtx) -> Self {
        Self {
            ctx,
            dry_run: false,
        }
    }

    /// 处理一个源文档，返回运行报告
    ///
    /// 文档级失败时仍然输出统计，然后返回错误。
    pub async fn run(&self, source_url: &str) -> Result<RunReport> {
        logging::log_startup(source_url, self.dry_run);

        match DocumentFlow::new(&self.ctx).run(source_url).await {
            Ok(report) => {
                logging::print_final_stats(&report, &self.ctx.config.output_log_file);
                Ok(report)
            }
            Err(err) => {
                error!("❌ 文档处理失败: {}", err);
                let report = match err.interrupted_document() {
                    Some((document_id, label)) => {
                        let mut report = RunReport::new(label);
                        report.document_id = Some(document_id);
                        if let AppError::Interrupted { phase, .. } = &err {
                            report.interrupted_phase = Some(phase.to_string());
                        }
                        report
                    }
                    None => RunReport::new(
                        filename_from_url(source_url).unwrap_or_else(|_| source_url.to_string()),
                    ),
                };
                logging::print_final_stats(&report, &self.ctx.config.output_log_file);
                Err(err).with_context(|| format!("处理 {} 失败", source_url))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{NoRasterizer, ScriptedCompletion, StaticFetcher, StaticRecognition};

    fn quiet_config() -> Config {
        Config {
            inter_call_delay_ms: 0,
            phase_pause_ms: 0,
            max_attempts: 1,
            retry_initial_delay_ms: 0,
            warn_file: std::env::temp_dir()
                .join(format!("qcm_bank_app_warn_{}.txt", std::process::id()))
                .to_string_lossy()
                .to_string(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_recognition_without_text_is_a_failure() {
        let ctx = PipelineCtx::new(
            quiet_config(),
            Arc::new(StaticFetcher),
            Arc::new(NoRasterizer),
            Arc::new(StaticRecognition::new(["", "  "])),
            Arc::new(ScriptedCompletion::new()),
            Arc::new(MemoryStore::new()),
        );
        let app = App::with_ctx(ctx);
        assert!(app.run("https://example.org/vide.pdf").await.is_err());
    }
}
