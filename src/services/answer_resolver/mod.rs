//! 答案判定 - 业务能力层
//!
//! 检测器按优先级依次运行：一个检测器先处理完所有题目，再轮到下一个。
//! 已确定的题目不再交给后面的检测器；显式答案行有歧义的题目只交给读图检测器。

mod detectors;
mod evidence;

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info};

pub use detectors::{
    collect_truth_marks, CompactLineDetector, Detector, EliminationDetector, ExplicitKeyDetector,
    LlmAnswerDetector, TruthAnnotationDetector, TruthMarks, VisionDetector,
};
pub use evidence::{parse_key_letters, AnswerKey, Evidence, QuestionView};

use crate::models::LetterSet;
use crate::services::caller::ServiceCaller;

/// 检测器种类，顺序即优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DetectorKind {
    Explicit,
    Truth,
    Compact,
    Elimination,
    Llm,
    Vision,
}

impl DetectorKind {
    /// 1 为最高优先级
    pub fn rank(self) -> u8 {
        match self {
            Self::Explicit => 1,
            Self::Truth => 2,
            Self::Compact => 3,
            Self::Elimination => 4,
            Self::Llm => 5,
            Self::Vision => 6,
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Explicit => "答案行",
            Self::Truth => "真假标注",
            Self::Compact => "紧凑答案",
            Self::Elimination => "排除法",
            Self::Llm => "逐题问答",
            Self::Vision => "读图",
        };
        write!(f, "{}", name)
    }
}

/// 单个检测器对单道题的结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    Resolved(LetterSet),
    Ambiguous(String),
    NoResult,
}

/// 一道题的判定状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Unresolved,
    Ambiguous { reason: String },
    Resolved { letters: LetterSet, detector: DetectorKind },
}

impl Resolution {
    pub fn letters(&self) -> Option<&LetterSet> {
        match self {
            Self::Resolved { letters, .. } => Some(letters),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }
}

/// 一道题的最终状态以及每个检测器的结论
#[derive(Debug, Clone)]
pub struct ResolutionTrail {
    pub number: u32,
    pub state: Resolution,
    pub evidence: Vec<(DetectorKind, Detection)>,
}

impl ResolutionTrail {
    fn new(number: u32) -> Self {
        Self {
            number,
            state: Resolution::Unresolved,
            evidence: Vec::new(),
        }
    }

    /// 按规则合并一条结论
    fn apply(&mut self, kind: DetectorKind, detection: Detection) {
        match &detection {
            Detection::Resolved(letters) if letters.is_plausible() => {
                self.state = Resolution::Resolved {
                    letters: letters.clone(),
                    detector: kind,
                };
            }
            Detection::Ambiguous(reason) if matches!(self.state, Resolution::Unresolved) => {
                self.state = Resolution::Ambiguous {
                    reason: reason.clone(),
                };
            }
            _ => {}
        }
        self.evidence.push((kind, detection));
    }
}

/// 答案判定器
pub struct AnswerResolver<'a> {
    detectors: Vec<Box<dyn Detector + 'a>>,
    label: &'a str,
}

impl<'a> AnswerResolver<'a> {
    pub fn new(detectors: Vec<Box<dyn Detector + 'a>>, label: &'a str) -> Self {
        Self { detectors, label }
    }

    /// 六个检测器的标准组合；`vision_enabled` 为 false 时不读图
    pub fn standard(caller: &'a ServiceCaller, label: &'a str, vision_enabled: bool) -> Self {
        let mut detectors: Vec<Box<dyn Detector + 'a>> = vec![
            Box::new(ExplicitKeyDetector),
            Box::new(TruthAnnotationDetector),
            Box::new(CompactLineDetector),
            Box::new(EliminationDetector),
            Box::new(LlmAnswerDetector::new(caller, label)),
        ];
        if vision_enabled {
            detectors.push(Box::new(VisionDetector::new(caller, label)));
        }
        Self::new(detectors, label)
    }

    /// 对所有题目运行检测器
    pub async fn resolve(
        &self,
        questions: &[QuestionView],
        evidence: &Evidence,
    ) -> BTreeMap<u32, ResolutionTrail> {
        let mut trails: BTreeMap<u32, ResolutionTrail> = questions
            .iter()
            .map(|q| (q.number, ResolutionTrail::new(q.number)))
            .collect();

        for detector in &self.detectors {
            let kind = detector.kind();
            let mut settled = 0usize;

            for question in questions {
                let Some(trail) = trails.get_mut(&question.number) else {
                    continue;
                };
                if !detector.accepts(&trail.state) {
                    continue;
                }
                let detection = detector.attempt(question, evidence).await;
                if let Detection::Resolved(letters) = &detection {
                    debug!(
                        "[文档 {}] Q{} {} → {}",
                        self.label, question.number, kind, letters
                    );
                }
                trail.apply(kind, detection);
                if matches!(trail.state, Resolution::Resolved { detector, .. } if detector == kind) {
                    settled += 1;
                }
            }

            if settled > 0 {
                info!(
                    "[文档 {}] 🔎 检测器 {}({}) 确定了 {} 道题",
                    self.label,
                    kind.rank(),
                    kind,
                    settled
                );
            }
        }
        trails
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Letter, PageSection};
    use crate::testing::ScriptedCompletion;
    use crate::utils::RetryPolicy;
    use std::sync::Arc;
    use std::time::Duration;

    fn letters(s: &str) -> LetterSet {
        s.chars().filter_map(Letter::from_char).collect()
    }

    fn view(number: u32) -> QuestionView {
        QuestionView {
            number,
            body: format!("Énoncé {}", number),
            propositions: Letter::ALL
                .iter()
                .map(|l| (*l, format!("option {}", l)))
                .collect(),
        }
    }

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

    fn caller(completion: ScriptedCompletion) -> ServiceCaller {
        ServiceCaller::new(Arc::new(completion), RetryPolicy::immediate(1), Duration::ZERO)
    }

    #[tokio::test]
    async fn test_elimination_resolves_single_true() {
        let caller = caller(ScriptedCompletion::new());
        let resolver = AnswerResolver::standard(&caller, "test", false);
        let ev = evidence("Q5. Concernant le cœur : A. Faux B. Vrai C. Faux D. Faux E. Faux");
        let trails = resolver.resolve(&[view(5)], &ev).await;
        assert_eq!(trails[&5].state.letters(), Some(&letters("B")));
    }

    #[tokio::test]
    async fn test_explicit_key_wins_over_later_detectors() {
        let completion = ScriptedCompletion::new()
            .respond(r#"{"question_num": 1, "correct_answers": ["D"], "confidence": 0.9}"#);
        let caller = caller(completion);
        let resolver = AnswerResolver::standard(&caller, "test", false);
        let ev = evidence("Q1. Énoncé\nA. Faux\nB. Vrai\nRéponses justes : A, C\n\n1 : E");
        let trails = resolver.resolve(&[view(1)], &ev).await;

        assert_eq!(
            trails[&1].state,
            Resolution::Resolved {
                letters: letters("AC"),
                detector: DetectorKind::Explicit
            }
        );
        // 后面的检测器不会被调用
        assert_eq!(trails[&1].evidence.len(), 1);
        assert_eq!(caller.call_count(), 0);
    }

    #[tokio::test]
    async fn test_llm_used_when_text_has_no_answer() {
        let completion = ScriptedCompletion::new().respond_when(
            "question 2",
            r#"{"question_num": 2, "correct_answers": ["B", "E"], "confidence": 0.7}"#,
        );
        let caller = caller(completion);
        let resolver = AnswerResolver::standard(&caller, "test", false);
        let ev = evidence("Q2. Énoncé sans correction\nA. a\nB. b");
        let trails = resolver.resolve(&[view(2)], &ev).await;

        assert_eq!(
            trails[&2].state,
            Resolution::Resolved {
                letters: letters("BE"),
                detector: DetectorKind::Llm
            }
        );
    }

    #[tokio::test]
    async fn test_llm_answer_for_other_question_is_ignored() {
        let completion = ScriptedCompletion::new()
            .respond(r#"{"question_num": 9, "correct_answers": ["A"]}"#);
        let caller = caller(completion);
        let resolver = AnswerResolver::standard(&caller, "test", false);
        let trails = resolver
            .resolve(&[view(3)], &evidence("Q3. Énoncé\nA. a"))
            .await;
        assert_eq!(trails[&3].state, Resolution::Unresolved);
    }

    #[tokio::test]
    async fn test_ambiguous_key_skips_text_detectors() {
        let caller = caller(ScriptedCompletion::new());
        let resolver = AnswerResolver::standard(&caller, "test", false);
        // 有真假标注，但答案行有歧义：不应被真假标注覆盖
        let ev = evidence("Q4. Énoncé\nA. Vrai\nB. Faux\nRéponses justes : aucune");
        let trails = resolver.resolve(&[view(4)], &ev).await;

        assert!(matches!(trails[&4].state, Resolution::Ambiguous { .. }));
        assert_eq!(caller.call_count(), 0);
    }

    #[tokio::test]
    async fn test_bare_answer_header_leaves_compact_grid_usable() {
        let caller = caller(ScriptedCompletion::new());
        let resolver = AnswerResolver::standard(&caller, "test", false);
        let ev = evidence("Q1. Énoncé un\nA. a\nQ2. Énoncé deux\nA. a\n\nRéponses :\n1 : A\n2 : B, D");
        let trails = resolver.resolve(&[view(1), view(2)], &ev).await;

        assert_eq!(trails[&1].state.letters(), Some(&letters("A")));
        assert_eq!(
            trails[&2].state,
            Resolution::Resolved {
                letters: letters("BD"),
                detector: DetectorKind::Compact
            }
        );
        assert_eq!(caller.call_count(), 0);
    }

    /// 单页证据，并为该页写一张临时图片
    fn evidence_with_image(name: &str, text: &str) -> Evidence {
        let path = std::env::temp_dir().join(format!(
            "qcm_bank_vision_{}_{}.jpg",
            name,
            std::process::id()
        ));
        std::fs::write(&path, [0xFF, 0xD8, 0xFF, 0xD9]).unwrap();
        Evidence::build(
            &[PageSection {
                page: 1,
                text: text.to_string(),
                overlap_len: 0,
            }],
            BTreeMap::from([(1, path)]),
        )
    }

    #[tokio::test]
    async fn test_vision_overrides_ambiguous_key() {
        let completion = ScriptedCompletion::new().respond_when(
            "Question 4 uniquement",
            r#"{"question_num": 4, "correct_answers": ["A", "D"], "confidence": 0.9}"#,
        );
        let caller = caller(completion);
        let resolver = AnswerResolver::standard(&caller, "test", true);
        let ev = evidence_with_image(
            "override",
            "Q4. Énoncé\nA. Vrai\nB. Faux\nRéponses justes : aucune",
        );
        let trails = resolver.resolve(&[view(4)], &ev).await;

        assert_eq!(
            trails[&4].state,
            Resolution::Resolved {
                letters: letters("AD"),
                detector: DetectorKind::Vision
            }
        );
        // 只调用了读图，没有逐题问答
        assert_eq!(caller.call_count(), 1);
    }

    #[tokio::test]
    async fn test_vision_reply_for_other_question_is_ignored() {
        let completion = ScriptedCompletion::new().respond_when(
            "Question 4 uniquement",
            r#"{"question_num": 5, "correct_answers": ["B"]}"#,
        );
        let caller = caller(completion);
        let resolver = AnswerResolver::standard(&caller, "test", true);
        let ev = evidence_with_image(
            "mismatch",
            "Q4. Énoncé\nA. Vrai\nB. Faux\nRéponses justes : aucune",
        );
        let trails = resolver.resolve(&[view(4)], &ev).await;

        assert!(matches!(trails[&4].state, Resolution::Ambiguous { .. }));
    }

    #[test]
    fn test_ranks_follow_declaration_order() {
        let kinds = [
            DetectorKind::Explicit,
            DetectorKind::Truth,
            DetectorKind::Compact,
            DetectorKind::Elimination,
            DetectorKind::Llm,
            DetectorKind::Vision,
        ];
        for pair in kinds.windows(2) {
            assert!(pair[0].rank() < pair[1].rank());
            assert!(pair[0] < pair[1]);
        }
    }
}
