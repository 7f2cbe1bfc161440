//! # QCM Bank
//!
//! 把扫描版选择题试卷（QCM）抽取成结构化题库：题干、A–E 五个选项以及正确选项集合。
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 外部协作方的客户端，只暴露能力
//! - `CompletionService` / `RecognitionService` - 补全与识别服务接口
//! - `SourceFetcher` / `PageRasterizer` - 下载源文档、转成页面图片
//! - `QuestionStore` - 文档 / 题目 / 选项三张表（SQLite 或内存）
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - 分页、分批、题目抽取、选项抽取、答案判定、对账写入
//! - `WarnWriter` - 写警告文件能力
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一份文档"的完整处理流程
//! - `PipelineCtx` - 上下文封装（所有客户端）
//! - `DocumentFlow` - 流程编排（识别 → 题目 → 选项 → 答案）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/app` - 初始化资源、运行、输出统计
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod testing;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::{Letter, LetterSet};
pub use orchestrator::App;
pub use workflow::{DocumentFlow, PipelineCtx, RunReport};
