use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::error;

use qcm_bank::utils::logging;
use qcm_bank::{App, Config};

/// 把 QCM 试卷 PDF 抽取成题库
#[derive(Parser, Debug)]
#[command(name = "qcm-bank", version, about)]
struct Cli {
    /// 源文档 URL
    source_url: String,

    /// 输出调试日志
    #[arg(short, long)]
    verbose: bool,

    /// TOML 配置文件（环境变量优先）
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// 只写入内存存储
    #[arg(long)]
    dry_run: bool,
}

async fn run(cli: Cli) -> Result<bool> {
    // 加载配置
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env(),
    };

    // 初始化日志
    logging::init(cli.verbose || config.verbose_logging);

    let app = App::initialize(config, cli.dry_run).await?;
    let report = app.run(&cli.source_url).await?;
    Ok(report.is_persisted())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let verbose = cli.verbose;

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            // 配置加载失败时日志尚未初始化
            logging::init(verbose);
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}
