//! 转写质量检查 - 业务能力层
//!
//! 识别服务返回的页面文本先过一道质量检查；不合格的页面用页面图片
//! 交给视觉模型重新转写，结果足够长时才替换原文。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::infrastructure::{CompletionRequest, ImageInput, ModelTier};
use crate::services::caller::ServiceCaller;
use crate::services::markers;

/// 重新转写的结果至少要这么长才会替换原文
const MIN_RETRANSCRIPTION_CHARS: usize = 100;

static GARBAGE_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\u{FFFD}|[^\p{L}\p{N}\s\.,;:!?'’()\[\]{}\-–*#/%+=<>°_|$&@^~`]{6,}")
        .expect("乱码正则无效")
});

/// 页面不合格的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageIssue {
    TooShort(usize),
    Garbage,
    MissingMarker,
}

impl fmt::Display for PageIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageIssue::TooShort(len) => write!(f, "文本过短 ({} 字符)", len),
            PageIssue::Garbage => write!(f, "含乱码"),
            PageIssue::MissingMarker => write!(f, "缺少题号标记"),
        }
    }
}

/// 页面质量检查
#[derive(Debug, Clone, Default)]
pub struct QualityGate {
    pub min_page_chars: usize,
    /// 已知应当含有题号的页（从 1 开始）
    pub expected_marker_pages: BTreeSet<usize>,
}

impl QualityGate {
    pub fn new(min_page_chars: usize, expected_marker_pages: impl IntoIterator<Item = usize>) -> Self {
        Self {
            min_page_chars,
            expected_marker_pages: expected_marker_pages.into_iter().collect(),
        }
    }

    pub fn inspect(&self, page: usize, text: &str) -> Option<PageIssue> {
        let len = text.trim().chars().count();
        if len < self.min_page_chars {
            return Some(PageIssue::TooShort(len));
        }
        if GARBAGE_RUN.is_match(text) {
            return Some(PageIssue::Garbage);
        }
        if self.expected_marker_pages.contains(&page) && markers::marker_numbers(text).is_empty() {
            return Some(PageIssue::MissingMarker);
        }
        None
    }
}

/// 转写结果
#[derive(Debug, Default)]
pub struct Transcription {
    pub pages: Vec<String>,
    /// 不合格的页及原因
    pub flagged: Vec<(usize, PageIssue)>,
    /// 被重新转写替换的页
    pub replaced: Vec<usize>,
}

pub struct Transcriber<'a> {
    caller: &'a ServiceCaller,
    gate: QualityGate,
    label: &'a str,
}

impl<'a> Transcriber<'a> {
    pub fn new(caller: &'a ServiceCaller, gate: QualityGate, label: &'a str) -> Self {
        Self { caller, gate, label }
    }

    fn build_prompt(page: usize) -> String {
        format!(
            r#"Tu es un expert en extraction de texte à partir d'images de QCM.

Page {page} : extrais TOUT le texte visible sur cette image, de façon exhaustive et précise.

Consignes :
1. Identifie chaque question avec son numéro (Q1, Q2, ...).
2. Extrais chaque proposition A, B, C, D, E avec son texte complet.
3. Préserve la structure et la numérotation exacte.
4. Si tu vois des corrections ou des réponses justes, inclus-les.

Format Markdown :
## Q[numéro]. [énoncé]

A. [proposition A]
B. [proposition B]
C. [proposition C]
D. [proposition D]
E. [proposition E]"#
        )
    }

    /// 检查每一页，不合格且有图片的页重新转写
    pub async fn review(
        &self,
        pages: Vec<String>,
        page_images: &BTreeMap<usize, PathBuf>,
    ) -> Transcription {
        let mut result = Transcription {
            pages,
            ..Transcription::default()
        };

        for index in 0..result.pages.len() {
            let page = index + 1;
            let Some(issue) = self.gate.inspect(page, &result.pages[index]) else {
                continue;
            };
            warn!("[文档 {}] p{} 识别质量不足: {}", self.label, page, issue);
            result.flagged.push((page, issue));

            let Some(path) = page_images.get(&page) else {
                debug!("[文档 {}] p{} 没有页面图片，保留原文", self.label, page);
                continue;
            };
            let image = match ImageInput::from_path(path).await {
                Ok(image) => image,
                Err(err) => {
                    warn!("[文档 {}] 读取 {} 失败: {}", self.label, path.display(), err);
                    continue;
                }
            };

            let call_label = format!("[文档 {}] p{} 重新转写", self.label, page);
            let request = CompletionRequest::text(ModelTier::Vision, Self::build_prompt(page))
                .with_image(image);
            let Some(text) = self.caller.ask(&call_label, request).await else {
                continue;
            };

            if text.trim().chars().count() > MIN_RETRANSCRIPTION_CHARS {
                info!("[文档 {}] ✅ p{} 已用重新转写的文本替换", self.label, page);
                result.pages[index] = text.trim().to_string();
                result.replaced.push(page);
            } else {
                debug!("{} 结果过短，保留原文", call_label);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedCompletion;
    use crate::utils::RetryPolicy;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_quality_gate() {
        let gate = QualityGate::new(20, [2]);
        let good = "Q1. Une question assez longue pour passer le seuil";
        assert_eq!(gate.inspect(1, good), None);
        assert_eq!(gate.inspect(1, "court"), Some(PageIssue::TooShort(5)));
        assert_eq!(
            gate.inspect(1, "Texte normal puis ¤¤¤¤¤¤¤¤ et la suite du texte"),
            Some(PageIssue::Garbage)
        );
        assert_eq!(
            gate.inspect(2, "Une page de texte sans aucun numéro de question"),
            Some(PageIssue::MissingMarker)
        );
    }

    #[tokio::test]
    async fn test_page_without_image_is_kept() {
        let caller = ServiceCaller::new(
            Arc::new(ScriptedCompletion::new()),
            RetryPolicy::immediate(1),
            Duration::ZERO,
        );
        let transcriber = Transcriber::new(&caller, QualityGate::new(500, []), "test");
        let result = transcriber
            .review(vec!["court".to_string()], &BTreeMap::new())
            .await;

        assert_eq!(result.pages, vec!["court".to_string()]);
        assert_eq!(result.flagged.len(), 1);
        assert!(result.replaced.is_empty());
        assert_eq!(caller.call_count(), 0);
    }
}
