//! 六个答案检测器，按优先级排列
//!
//! 1. 显式答案行  2. 逐项真假标注  3. 紧凑答案行
//! 4. 排除法  5. 逐题问答  6. 读图核对

use std::collections::BTreeSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use phf::phf_map;
use regex::Regex;
use tracing::{debug, warn};

use super::evidence::{AnswerKey, Evidence, QuestionView};
use super::{Detection, DetectorKind, Resolution};
use crate::infrastructure::{CompletionRequest, ImageInput, ModelTier};
use crate::models::{Letter, LetterSet};
use crate::services::caller::ServiceCaller;
use crate::services::schema;

/// 真假标注用词（小写）
static TRUTH_WORDS: phf::Map<&'static str, bool> = phf_map! {
    "vrai" => true,
    "vraie" => true,
    "juste" => true,
    "correct" => true,
    "correcte" => true,
    "exact" => true,
    "exacte" => true,
    "true" => true,
    "faux" => false,
    "fausse" => false,
    "incorrect" => false,
    "incorrecte" => false,
    "inexact" => false,
    "inexacte" => false,
    "false" => false,
};

static TRUTH_ANNOTATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-E])\s*[\.\):\-–]?\s*(?:\*\*)?\s*(?:(?:[:=\-–]|→|=>)\s*)?(?:\*\*)?\s*(\p{L}+)")
        .expect("真假标注正则无效")
});

/// 检测器
#[async_trait]
pub trait Detector: Send + Sync {
    fn kind(&self) -> DetectorKind;

    /// 是否处理当前状态的题目；默认只处理未确定的题目
    fn accepts(&self, state: &Resolution) -> bool {
        matches!(state, Resolution::Unresolved)
    }

    async fn attempt(&self, question: &QuestionView, evidence: &Evidence) -> Detection;
}

/// 把字母集合转成判定结果；集合不在 1..=5 时视为无结果
fn resolved_or_none(letters: LetterSet) -> Detection {
    if letters.is_plausible() {
        Detection::Resolved(letters)
    } else {
        Detection::NoResult
    }
}

// ========== 1. 显式答案行 ==========

/// "Réponses justes : A, C, E" 这类答案行
pub struct ExplicitKeyDetector;

#[async_trait]
impl Detector for ExplicitKeyDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Explicit
    }

    async fn attempt(&self, question: &QuestionView, evidence: &Evidence) -> Detection {
        match evidence.answer_keys.get(&question.number) {
            Some(AnswerKey::Letters(letters)) => resolved_or_none(letters.clone()),
            Some(AnswerKey::Ambiguous(reason)) => Detection::Ambiguous(reason.clone()),
            None => Detection::NoResult,
        }
    }
}

// ========== 2./4. 真假标注 ==========

/// 题目区间内每个字母的真假标注
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TruthMarks {
    pub truthy: LetterSet,
    pub falsy: LetterSet,
}

impl TruthMarks {
    /// 同一字母既标真又标假
    pub fn is_conflicting(&self) -> bool {
        self.truthy.iter().any(|l| self.falsy.contains(l))
    }
}

/// 收集一段文本中的 "<字母>. <Vrai|Faux|...>" 标注
pub fn collect_truth_marks<'a>(spans: impl IntoIterator<Item = &'a str>) -> TruthMarks {
    let mut marks = TruthMarks::default();
    for span in spans {
        for caps in TRUTH_ANNOTATION.captures_iter(span) {
            let (Some(letter), Some(word)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let Ok(letter) = letter.as_str().parse::<Letter>() else {
                continue;
            };
            match TRUTH_WORDS.get(word.as_str().to_lowercase().as_str()) {
                Some(true) => {
                    marks.truthy.insert(letter);
                }
                Some(false) => {
                    marks.falsy.insert(letter);
                }
                None => {}
            }
        }
    }
    marks
}

/// 取被标为正确的字母
pub struct TruthAnnotationDetector;

#[async_trait]
impl Detector for TruthAnnotationDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Truth
    }

    async fn attempt(&self, question: &QuestionView, evidence: &Evidence) -> Detection {
        let marks = collect_truth_marks(evidence.span_texts(question.number));
        if marks.is_conflicting() {
            debug!("Q{} 真假标注互相矛盾: 真 {} / 假 {}", question.number, marks.truthy, marks.falsy);
            return Detection::NoResult;
        }
        resolved_or_none(marks.truthy)
    }
}

/// 排除法：部分字母被标为错误时，其余字母视为正确
pub struct EliminationDetector;

#[async_trait]
impl Detector for EliminationDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Elimination
    }

    async fn attempt(&self, question: &QuestionView, evidence: &Evidence) -> Detection {
        let marks = collect_truth_marks(evidence.span_texts(question.number));
        if marks.is_conflicting() {
            return Detection::NoResult;
        }
        let false_count = marks.falsy.len();
        if false_count == 0 || false_count >= 5 {
            return Detection::NoResult;
        }
        resolved_or_none(marks.falsy.complement())
    }
}

// ========== 3. 紧凑答案行 ==========

/// "12 : A, C" 这类简写答案行（不含已被显式答案行占用的行）
pub struct CompactLineDetector;

#[async_trait]
impl Detector for CompactLineDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Compact
    }

    async fn attempt(&self, question: &QuestionView, evidence: &Evidence) -> Detection {
        let Some(lines) = evidence.compact_lines.get(&question.number) else {
            return Detection::NoResult;
        };
        let distinct: BTreeSet<String> = lines
            .iter()
            .filter(|(offset, _)| !evidence.consumed_lines.contains(offset))
            .map(|(_, letters)| letters.to_string())
            .collect();
        if distinct.len() != 1 {
            return Detection::NoResult;
        }
        lines
            .iter()
            .find(|(offset, _)| !evidence.consumed_lines.contains(offset))
            .map(|(_, letters)| resolved_or_none(letters.clone()))
            .unwrap_or(Detection::NoResult)
    }
}

// ========== 5. 逐题问答 ==========

/// 把题干和五个选项交给补全服务作答
pub struct LlmAnswerDetector<'a> {
    caller: &'a ServiceCaller,
    label: &'a str,
}

impl<'a> LlmAnswerDetector<'a> {
    pub fn new(caller: &'a ServiceCaller, label: &'a str) -> Self {
        Self { caller, label }
    }

    fn build_prompt(question: &QuestionView) -> String {
        let options: Vec<String> = question
            .propositions
            .iter()
            .map(|(letter, text)| format!("{}. {}", letter, text))
            .collect();
        format!(
            r#"Voici la question {} d'un QCM. Une ou plusieurs propositions sont exactes.

Question : {}

Propositions :
{}

Indique la ou les lettres des propositions exactes.
Réponds UNIQUEMENT avec un objet JSON de la forme :
{{"question_num": {}, "correct_answers": ["A", "C"], "confidence": 0.8, "explanation": "..."}}"#,
            question.number,
            question.body,
            options.join("\n"),
            question.number
        )
    }
}

#[async_trait]
impl Detector for LlmAnswerDetector<'_> {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Llm
    }

    async fn attempt(&self, question: &QuestionView, _evidence: &Evidence) -> Detection {
        if question.propositions.is_empty() {
            return Detection::NoResult;
        }
        let call_label = format!("[文档 {}] Q{} 逐题问答", self.label, question.number);
        let request = CompletionRequest::text(ModelTier::Standard, Self::build_prompt(question))
            .with_system("Tu es un correcteur expert de QCM. Tu réponds uniquement en JSON.")
            .expect_json();

        let Some(raw) = self.caller.ask(&call_label, request).await else {
            return Detection::NoResult;
        };
        match schema::parse_answer(&raw) {
            Ok(answer) if answer.question_num.is_some_and(|n| n != question.number) => {
                warn!(
                    "{} 返回了其他题号 {:?}，忽略",
                    call_label, answer.question_num
                );
                Detection::NoResult
            }
            Ok(answer) => resolved_or_none(answer.letters),
            Err(err) => {
                self.caller.note_malformed(&call_label, &err, &raw);
                Detection::NoResult
            }
        }
    }
}

// ========== 6. 读图核对 ==========

/// 最多检查的页数
const MAX_VISION_PAGES: usize = 3;

/// 找出最可能包含该题的页面图片，让视觉模型直接读答案
///
/// 也处理显式答案行有歧义的题目。
pub struct VisionDetector<'a> {
    caller: &'a ServiceCaller,
    label: &'a str,
}

impl<'a> VisionDetector<'a> {
    pub fn new(caller: &'a ServiceCaller, label: &'a str) -> Self {
        Self { caller, label }
    }

    /// 候选页：先是出现过题号的页，再是按题量估算的页
    fn candidate_pages(question: &QuestionView, evidence: &Evidence) -> Vec<usize> {
        let mut pages = evidence.pages_with_marker(question.number);
        for page in evidence.estimated_pages(question.number) {
            if !pages.contains(&page) {
                pages.push(page);
            }
        }
        pages
            .into_iter()
            .filter(|p| evidence.page_images.contains_key(p))
            .take(MAX_VISION_PAGES)
            .collect()
    }

    fn build_prompt(number: u32) -> String {
        format!(
            r#"Analyse cette image d'un QCM et identifie les RÉPONSES CORRECTES pour la Question {n} uniquement.

CONSIGNES PRÉCISES :
1. Cherche UNIQUEMENT la Question {n} et ses réponses correctes.
2. Cherche des indications comme "Réponses justes", "Réponses correctes", "Bonnes réponses", etc.
3. Tu peux aussi repérer les réponses marquées individuellement comme "Vrai" ou "Faux".
4. Si plusieurs réponses sont correctes, liste-les toutes (A, B, C, D, E).
5. Si la Question {n} n'apparaît pas sur l'image, renvoie "question_num": null.

RÉPONDS UNIQUEMENT AU FORMAT JSON :
{{"question_num": {n}, "correct_answers": ["A", "C", "E"], "confidence": 0.95, "explanation": "..."}}"#,
            n = number
        )
    }
}

#[async_trait]
impl Detector for VisionDetector<'_> {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Vision
    }

    fn accepts(&self, state: &Resolution) -> bool {
        matches!(state, Resolution::Unresolved | Resolution::Ambiguous { .. })
    }

    async fn attempt(&self, question: &QuestionView, evidence: &Evidence) -> Detection {
        let pages = Self::candidate_pages(question, evidence);
        if pages.is_empty() {
            debug!("[文档 {}] Q{} 没有可用的页面图片", self.label, question.number);
            return Detection::NoResult;
        }

        for page in pages {
            let Some(path) = evidence.page_images.get(&page) else {
                continue;
            };
            let image = match ImageInput::from_path(path).await {
                Ok(image) => image,
                Err(err) => {
                    warn!("[文档 {}] 读取页面图片 {} 失败: {}", self.label, path.display(), err);
                    continue;
                }
            };

            let call_label = format!("[文档 {}] Q{} 读图 p{}", self.label, question.number, page);
            let request = CompletionRequest::text(ModelTier::Vision, Self::build_prompt(question.number))
                .with_image(image)
                .expect_json();
            let Some(raw) = self.caller.ask(&call_label, request).await else {
                continue;
            };

            match schema::parse_answer(&raw) {
                // 必须确认读到的是同一题
                Ok(answer) if answer.question_num == Some(question.number) => {
                    debug!(
                        "{} → {} (置信度 {:?})",
                        call_label, answer.letters, answer.confidence
                    );
                    return resolved_or_none(answer.letters);
                }
                Ok(answer) => {
                    debug!("{} 题号不符: {:?}", call_label, answer.question_num);
                }
                Err(err) => {
                    debug!("{} 无法解析: {}", call_label, err);
                }
            }
        }
        Detection::NoResult
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PageSection;
    use std::collections::BTreeMap;

    fn evidence(text: &str) -> Evidence {
        Evidence::build(
            &[PageSection {
                page: 1,
                text: text.to_string(),
                overlap_len: 0,
            }],
            BTreeMap::new(),
        )
    }

    fn question(number: u32) -> QuestionView {
        QuestionView {
            number,
            body: String::new(),
            propositions: BTreeMap::new(),
        }
    }

    fn letters(s: &str) -> LetterSet {
        s.chars().filter_map(Letter::from_char).collect()
    }

    #[test]
    fn test_elimination_by_falsity() {
        let ev = evidence("Q5. Concernant le cœur : A. Faux B. Vrai C. Faux D. Faux E. Faux");
        let detection = tokio_test::block_on(EliminationDetector.attempt(&question(5), &ev));
        assert_eq!(detection, Detection::Resolved(letters("B")));
    }

    #[test]
    fn test_elimination_needs_between_one_and_four_false() {
        let all_false = evidence("Q2. x A. Faux B. Faux C. Faux D. Faux E. Faux");
        let none = evidence("Q2. x sans annotation");
        assert_eq!(
            tokio_test::block_on(EliminationDetector.attempt(&question(2), &all_false)),
            Detection::NoResult
        );
        assert_eq!(
            tokio_test::block_on(EliminationDetector.attempt(&question(2), &none)),
            Detection::NoResult
        );
    }

    #[tokio::test]
    async fn test_truth_annotations_within_span_only() {
        let ev = evidence("Q1. Énoncé\nA. Vrai\nB. Faux\nC) Juste\nQ2. Autre\nD. Vrai");
        let detection = TruthAnnotationDetector.attempt(&question(1), &ev).await;
        assert_eq!(detection, Detection::Resolved(letters("AC")));
    }

    #[tokio::test]
    async fn test_truth_conflict_is_no_result() {
        let ev = evidence("Q1. Énoncé\nA. Vrai\nA. Faux");
        assert_eq!(
            TruthAnnotationDetector.attempt(&question(1), &ev).await,
            Detection::NoResult
        );
    }

    #[tokio::test]
    async fn test_explicit_detector_reports_ambiguity() {
        let ev = evidence("Q4. Énoncé\nA. a\nRéponses justes : aucune");
        assert!(matches!(
            ExplicitKeyDetector.attempt(&question(4), &ev).await,
            Detection::Ambiguous(_)
        ));
    }

    #[tokio::test]
    async fn test_compact_line_detector() {
        let ev = evidence("Q1. Énoncé\nA. a\n\nGrille\n1 : B, D\n");
        assert_eq!(
            CompactLineDetector.attempt(&question(1), &ev).await,
            Detection::Resolved(letters("BD"))
        );
        assert_eq!(
            CompactLineDetector.attempt(&question(2), &ev).await,
            Detection::NoResult
        );
    }

    #[test]
    fn test_vision_pages_prefer_marker_page_with_image() {
        let sections: Vec<PageSection> = ["Q1. a\nQ2. b", "Q3. c\nQ4. d", "Q5. e\nQ6. f"]
            .iter()
            .enumerate()
            .map(|(i, text)| PageSection {
                page: i + 1,
                text: text.to_string(),
                overlap_len: 0,
            })
            .collect();
        let images = BTreeMap::from([
            (1, std::path::PathBuf::from("p1.jpg")),
            (3, std::path::PathBuf::from("p3.jpg")),
        ]);
        let ev = Evidence::build(&sections, images);

        // 题号在第 2 页，但第 2 页没有图片：退到估算页
        assert_eq!(VisionDetector::candidate_pages(&question(3), &ev), vec![1, 3]);
        assert_eq!(VisionDetector::candidate_pages(&question(5), &ev), vec![3]);
    }

    #[test]
    fn test_text_detectors_skip_ambiguous() {
        let state = Resolution::Ambiguous {
            reason: "x".to_string(),
        };
        assert!(!ExplicitKeyDetector.accepts(&state));
        assert!(!EliminationDetector.accepts(&state));
    }
}
