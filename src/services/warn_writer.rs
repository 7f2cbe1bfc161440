//! 警告写入服务 - 业务能力层
//!
//! 只负责"写 warn 文件"能力，不关心流程

use anyhow::{Context, Result};
use std::fmt;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// 警告类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarnKind {
    Gap,
    Ambiguous,
    Unresolved,
    Incomplete,
    Malformed,
    Interrupted,
}

impl fmt::Display for WarnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WarnKind::Gap => "缺号",
            WarnKind::Ambiguous => "答案有歧义",
            WarnKind::Unresolved => "答案未确定",
            WarnKind::Incomplete => "选项不全",
            WarnKind::Malformed => "响应格式错误",
            WarnKind::Interrupted => "处理中断",
        };
        write!(f, "{}", name)
    }
}

/// 警告写入服务
///
/// 每条警告一行：`文档 | 题号 | 类别: 详情`
pub struct WarnWriter {
    warn_file_path: String,
}

impl WarnWriter {
    /// 使用自定义文件路径创建
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            warn_file_path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.warn_file_path
    }

    /// 格式化一行警告
    pub fn format_line(document: &str, question: Option<u32>, kind: WarnKind, detail: &str) -> String {
        let question = question.map_or_else(|| "-".to_string(), |n| format!("Q{}", n));
        format!("{} | {} | {}: {}\n", document, question, kind, detail)
    }

    /// 追加一条警告
    pub async fn write(
        &self,
        document: &str,
        question: Option<u32>,
        kind: WarnKind,
        detail: &str,
    ) -> Result<()> {
        debug!("写入警告: 文档 {} | {:?} | {}", document, question, kind);

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.warn_file_path)
            .await
            .with_context(|| format!("无法打开警告文件 {}", self.warn_file_path))?;

        let line = Self::format_line(document, question, kind, detail);
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

impl Default for WarnWriter {
    fn default() -> Self {
        Self::with_path("warn.txt")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line() {
        assert_eq!(
            WarnWriter::format_line("ue3-cb1", Some(7), WarnKind::Gap, "题号缺失"),
            "ue3-cb1 | Q7 | 缺号: 题号缺失\n"
        );
        assert_eq!(
            WarnWriter::format_line("ue3-cb1", None, WarnKind::Malformed, "2 次"),
            "ue3-cb1 | - | 响应格式错误: 2 次\n"
        );
    }

    #[tokio::test]
    async fn test_write_appends() {
        let path = std::env::temp_dir().join(format!("qcm_bank_warn_{}.txt", std::process::id()));
        let writer = WarnWriter::with_path(path.to_string_lossy().to_string());
        writer.write("doc", Some(1), WarnKind::Unresolved, "a").await.unwrap();
        writer.write("doc", Some(2), WarnKind::Ambiguous, "b").await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content.lines().count(), 2);
        let _ = tokio::fs::remove_file(&path).await;
    }
}
