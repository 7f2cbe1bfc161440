/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use anyhow::Result;
use std::fs;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::workflow::RunReport;

/// 初始化 tracing 订阅者
///
/// `RUST_LOG` 优先；否则默认 `info`，详细模式下本 crate 使用 `debug`。
pub fn init(verbose: bool) {
    let default_directive = if verbose {
        "info,qcm_bank=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\n题库抽取日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// 记录程序启动信息
pub fn log_startup(source_url: &str, dry_run: bool) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 题库抽取模式");
    info!("📄 源文档: {}", source_url);
    if dry_run {
        info!("🧪 试运行：结果只写入内存存储");
    }
    info!("{}", "=".repeat(60));
}

/// 记录阶段开始信息
///
/// # 参数
/// - `label`: 文档标签
/// - `step`: 阶段编号
/// - `name`: 阶段名称
pub fn log_phase_start(label: &str, step: usize, name: &str) {
    info!("\n{}", "─".repeat(60));
    info!("[文档 {}] 📦 阶段 {}: {}", label, step, name);
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
pub fn print_final_stats(report: &RunReport, log_file_path: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 处理完成统计 [文档 {}]", report.label);
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("📝 题目: {} (新增 {})", report.question_count, report.questions_inserted);
    info!("🔤 选项: 新增 {}", report.propositions_inserted);
    info!("✅ 已确定答案: {}", report.resolved_count());
    info!("❓ 存在歧义: {}", report.ambiguous_count());
    info!("❌ 未确定答案: {}", report.unresolved_count());
    if !report.gaps.is_empty() {
        let gaps: Vec<String> = report.gaps.iter().map(|n| n.to_string()).collect();
        info!("🕳️ 题号缺口: {}", gaps.join(", "));
    }
    if !report.reported_gaps.is_empty() {
        let gaps: Vec<String> = report.reported_gaps.iter().map(|n| n.to_string()).collect();
        info!("🕳️ 服务报告的缺号: {}", gaps.join(", "));
    }
    if let (Some(id), Some(phase)) = (report.document_id, &report.interrupted_phase) {
        info!("🛑 文档 #{} 在{}阶段中断", id, phase);
    }
    info!("🧩 结构不完整: {}", report.structural_warnings.len());
    info!("⚠️ 格式错误响应: {}", report.malformed_responses);
    for (detector, count) in &report.detector_histogram {
        info!("   {:<12} {}", detector, count);
    }
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path);
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("Énoncé court", 50), "Énoncé court");
        assert_eq!(truncate_text("Énoncé long", 3), "Éno...");
    }
}
