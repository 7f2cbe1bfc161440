//! 题目抽取 - 业务能力层
//!
//! 流程：
//! 1. 文档较小时整份提交一次（大模型）
//! 2. 结果为空或明显偏少时，改为逐批提交
//! 3. 同一题号取最长的题干
//! 4. 计算 [min, max] 内缺失的题号，只报告不补
//!
//! 题号正则扫描的结果用来判断"偏少"，并报告服务漏掉的题号。

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::infrastructure::{CompletionRequest, ModelTier};
use crate::models::{Batch, PageSection, QuestionCandidate};
use crate::services::batch_planner;
use crate::services::caller::ServiceCaller;
use crate::services::markers;
use crate::services::schema;

const SYSTEM_PROMPT: &str = "Tu es un expert en analyse de QCM (Questionnaires à Choix Multiples). \
Tu réponds uniquement avec un objet JSON valide, sans texte autour.";

/// 抽取参数
#[derive(Debug, Clone, Copy)]
pub struct QuestionExtractorSettings {
    pub whole_document_char_limit: usize,
    pub whole_document_max_sections: usize,
}

/// 题目抽取结果
#[derive(Debug, Default)]
pub struct QuestionExtraction {
    /// 合并后的题干，按题号排序
    pub questions: BTreeMap<u32, String>,
    /// [min, max] 范围内缺失的题号
    pub gaps: BTreeSet<u32>,
    /// 服务自己报告的可疑缺号
    pub suspected_gaps: BTreeSet<u32>,
    /// 正则扫描到但服务没有返回的题号
    pub missed_by_service: BTreeSet<u32>,
    /// 是否使用了整份文档一次抽取的结果
    pub used_whole_document: bool,
    /// 没有产出任何候选的批次序号
    pub empty_batches: Vec<usize>,
}

fn build_prompt(batch: &Batch) -> String {
    format!(
        r#"À partir du contenu Markdown ci-dessous (une ou plusieurs pages d'un document QCM), identifie et extrais CHAQUE question.

Pour chaque question, fournis :
1. Le numéro de la question tel qu'il apparaît dans le texte.
2. Le texte intégral de la question, mot pour mot, y compris la phrase d'introduction ou le contexte.
   EXCLUS IMPÉRATIVEMENT : les propositions (A, B, C, D, E), les corrections et les justifications.

Si la numérotation observée présente des trous suspects (par exemple 5, 6, 8), indique les numéros manquants dans "numeros_manquants". N'invente jamais une question absente du texte.

Contenu à analyser :
---
{}
---

Retourne un objet JSON avec la clé "questions" (liste d'objets avec "numero" entier et "contenu" chaîne) et la clé "numeros_manquants" (liste d'entiers, éventuellement vide).

Exemple :
{{
  "questions": [
    {{"numero": 1, "contenu": "Quelle est la formule chimique de l'eau ?"}},
    {{"numero": 2, "contenu": "Concernant la photosynthèse, quelle(s) proposition(s) est (sont) exacte(s) ?"}}
  ],
  "numeros_manquants": []
}}"#,
        batch.text
    )
}

/// 按题号合并候选，每个题号保留最长的题干
pub fn merge_longest<I>(candidates: I) -> BTreeMap<u32, String>
where
    I: IntoIterator<Item = QuestionCandidate>,
{
    let mut merged: BTreeMap<u32, String> = BTreeMap::new();
    for candidate in candidates {
        match merged.get(&candidate.number) {
            Some(existing) if existing.chars().count() >= candidate.body.chars().count() => {}
            _ => {
                merged.insert(candidate.number, candidate.body);
            }
        }
    }
    merged
}

/// 题目抽取器
pub struct QuestionExtractor<'a> {
    caller: &'a ServiceCaller,
    settings: QuestionExtractorSettings,
    label: &'a str,
}

impl<'a> QuestionExtractor<'a> {
    pub fn new(caller: &'a ServiceCaller, settings: QuestionExtractorSettings, label: &'a str) -> Self {
        Self {
            caller,
            settings,
            label,
        }
    }

    /// 抽取一个批次；任何失败都返回空列表
    pub async fn extract_batch(&self, batch: &Batch, tier: ModelTier) -> (Vec<QuestionCandidate>, Vec<u32>) {
        let call_label = format!("[文档 {}] 题目抽取 批次 {} ({})", self.label, batch.index, batch.page_range());
        let request = CompletionRequest::text(tier, build_prompt(batch))
            .with_system(SYSTEM_PROMPT)
            .expect_json();

        let Some(raw) = self.caller.ask(&call_label, request).await else {
            return (Vec::new(), Vec::new());
        };

        match schema::parse_questions(&raw) {
            Ok(parsed) => {
                debug!("{} 返回 {} 道题", call_label, parsed.candidates.len());
                (parsed.candidates, parsed.suspected_gaps)
            }
            Err(err) => {
                self.caller.note_malformed(&call_label, &err, &raw);
                (Vec::new(), Vec::new())
            }
        }
    }

    fn whole_document_eligible(&self, sections: &[PageSection]) -> bool {
        let total: usize = sections.iter().map(|s| s.own_text().chars().count()).sum();
        total < self.settings.whole_document_char_limit
            && sections.len() <= self.settings.whole_document_max_sections
    }

    /// 抽取整份文档的题目
    pub async fn extract(&self, sections: &[PageSection], batches: &[Batch]) -> QuestionExtraction {
        let full_text: String = sections
            .iter()
            .map(|s| s.own_text())
            .collect::<Vec<_>>()
            .join("\n\n");
        let regex_numbers = markers::marker_numbers(&full_text);
        info!(
            "[文档 {}] 🔎 正则扫描到 {} 个题号标记",
            self.label,
            regex_numbers.len()
        );

        let mut extraction = QuestionExtraction::default();
        let mut candidates: Vec<QuestionCandidate> = Vec::new();
        let mut suspected: Vec<u32> = Vec::new();
        let mut need_batches = true;

        if self.whole_document_eligible(sections) {
            info!("[文档 {}] 📄 文档较小，整份提交抽取题目", self.label);
            let whole = batch_planner::whole_document(sections);
            let (found, gaps) = self.extract_batch(&whole, ModelTier::Large).await;
            let implausibly_few = found.is_empty() || found.len() * 2 < regex_numbers.len();
            if implausibly_few {
                warn!(
                    "[文档 {}] ⚠️ 整份抽取只得到 {} 道题（正则 {} 个），改为逐批抽取",
                    self.label,
                    found.len(),
                    regex_numbers.len()
                );
            } else {
                extraction.used_whole_document = true;
                need_batches = false;
            }
            candidates.extend(found);
            suspected.extend(gaps);
        }

        if need_batches {
            for batch in batches {
                let (found, gaps) = self.extract_batch(batch, ModelTier::Standard).await;
                if found.is_empty() {
                    extraction.empty_batches.push(batch.index);
                }
                info!(
                    "[文档 {}] 批次 {}/{} ({}) → {} 道题",
                    self.label,
                    batch.index,
                    batches.len(),
                    batch.page_range(),
                    found.len()
                );
                candidates.extend(found);
                suspected.extend(gaps);
            }
        }

        extraction.questions = merge_longest(candidates);
        extraction.gaps = markers::find_gaps(extraction.questions.keys());
        extraction.suspected_gaps = suspected.into_iter().collect();
        extraction.missed_by_service = regex_numbers
            .iter()
            .filter(|n| !extraction.questions.contains_key(n))
            .copied()
            .collect();

        if !extraction.gaps.is_empty() {
            warn!(
                "[文档 {}] ⚠️ 题号缺口: {:?}",
                self.label,
                extraction.gaps
            );
        }
        if !extraction.missed_by_service.is_empty() {
            warn!(
                "[文档 {}] ⚠️ 正则发现但服务未返回的题号: {:?}",
                self.label,
                extraction.missed_by_service
            );
        }
        info!(
            "[文档 {}] ✓ 共抽取 {} 道题",
            self.label,
            extraction.questions.len()
        );
        extraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedCompletion;
    use crate::utils::RetryPolicy;
    use std::sync::Arc;
    use std::time::Duration;

    fn section(page: usize, text: &str) -> PageSection {
        PageSection {
            page,
            text: text.to_string(),
            overlap_len: 0,
        }
    }

    fn settings() -> QuestionExtractorSettings {
        QuestionExtractorSettings {
            whole_document_char_limit: 40_000,
            whole_document_max_sections: 3,
        }
    }

    #[test]
    fn test_merge_keeps_longest_body() {
        let short = "x".repeat(40);
        let long = "y".repeat(120);
        let merged = merge_longest(vec![
            QuestionCandidate::new(12, short),
            QuestionCandidate::new(12, long.clone()),
            QuestionCandidate::new(3, "court"),
        ]);
        assert_eq!(merged[&12], long);
        assert_eq!(merged[&3], "court");
    }

    #[tokio::test]
    async fn test_malformed_batch_does_not_abort_others() {
        let completion = Arc::new(
            ScriptedCompletion::new()
                .respond_when("p1", "ceci n'est pas du JSON")
                .respond_when(
                    "p2",
                    r#"{"questions": [{"numero": 2, "contenu": "Deuxième"}]}"#,
                ),
        );
        let caller = ServiceCaller::new(completion, RetryPolicy::immediate(1), Duration::ZERO);
        let extractor = QuestionExtractor::new(&caller, settings(), "test");

        let batches = vec![
            Batch { index: 1, pages: vec![1], text: "# Page 1 p1 Q1. Première".to_string() },
            Batch { index: 2, pages: vec![2], text: "# Page 2 p2 Q2. Deuxième".to_string() },
        ];

        let (first, _) = extractor.extract_batch(&batches[0], ModelTier::Standard).await;
        let (second, _) = extractor.extract_batch(&batches[1], ModelTier::Standard).await;

        assert!(first.is_empty());
        assert_eq!(second, vec![QuestionCandidate::new(2, "Deuxième")]);
        assert_eq!(caller.malformed_count(), 1);
    }

    #[tokio::test]
    async fn test_whole_document_too_few_falls_back_to_batches() {
        let text: String = (1..=6).map(|n| format!("Q{}. Énoncé {}\n", n, n)).collect();
        let sections = vec![section(1, &text)];
        let batches = batch_planner::plan_batches(&sections, 10_000);

        // 第一次（整份）只返回 1 道题，第二次（逐批）返回全部
        let all: Vec<String> = (1..=6)
            .map(|n| format!(r#"{{"numero": {}, "contenu": "Énoncé {}"}}"#, n, n))
            .collect();
        let completion = Arc::new(
            ScriptedCompletion::new()
                .respond(r#"{"questions": [{"numero": 1, "contenu": "Énoncé 1"}]}"#)
                .respond(format!(r#"{{"questions": [{}]}}"#, all.join(","))),
        );
        let caller = ServiceCaller::new(completion.clone(), RetryPolicy::immediate(1), Duration::ZERO);
        let extractor = QuestionExtractor::new(&caller, settings(), "test");

        let extraction = extractor.extract(&sections, &batches).await;
        assert!(!extraction.used_whole_document);
        assert_eq!(extraction.questions.len(), 6);
        assert!(extraction.gaps.is_empty());
        assert_eq!(completion.call_count(), 2);
    }

    #[tokio::test]
    async fn test_gap_reported_not_filled() {
        let numbers: Vec<u32> = (1..=10).filter(|n| *n != 7).collect();
        let text: String = numbers.iter().map(|n| format!("Q{}. Énoncé {}\n", n, n)).collect();
        let sections = vec![section(1, &text)];
        let items: Vec<String> = numbers
            .iter()
            .map(|n| format!(r#"{{"numero": {}, "contenu": "Énoncé {}"}}"#, n, n))
            .collect();
        let completion = Arc::new(
            ScriptedCompletion::new().respond(format!(r#"{{"questions": [{}]}}"#, items.join(","))),
        );
        let caller = ServiceCaller::new(completion, RetryPolicy::immediate(1), Duration::ZERO);
        let extractor = QuestionExtractor::new(&caller, settings(), "test");

        let extraction = extractor.extract(&sections, &[]).await;
        assert!(extraction.used_whole_document);
        assert_eq!(extraction.gaps, BTreeSet::from([7]));
        assert!(!extraction.questions.contains_key(&7));
    }
}
