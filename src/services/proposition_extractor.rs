//! 选项抽取 - 业务能力层
//!
//! 先逐批让服务抽取 A–E 选项并合并；所有批次处理完后，
//! 对仍缺选项的题号用正则在全部页面里补扫。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::infrastructure::{CompletionRequest, ModelTier};
use crate::models::{Batch, Letter, PageSection, PropositionCandidate};
use crate::services::caller::ServiceCaller;
use crate::services::markers;
use crate::services::schema;

/// 题号标记之后扫描选项的窗口（字节）
const OPTION_WINDOW: usize = 2000;

const SYSTEM_PROMPT: &str = "Tu es un expert en analyse de QCM. \
Tu réponds uniquement avec un objet JSON valide, sans texte autour.";

static OPTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-•>]\s*)?(?:\*\*)?\(?([A-E])(?:\*\*)?\s*[\.\):\-–](?:\*\*)?\s*(.*)$")
        .expect("选项正则无效")
});

static STOP_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:\*\*)?\s*(?:r[ée]ponses?|correction|corrig[ée]|bonnes? r[ée]ponses?)\b")
        .expect("终止行正则无效")
});

/// 选项抽取结果
#[derive(Debug, Default)]
pub struct PropositionExtraction {
    pub by_number: BTreeMap<u32, PropositionCandidate>,
    /// 靠正则补扫补上了选项的题号
    pub regex_filled: BTreeSet<u32>,
    /// 补扫之后仍不满五个选项的题号
    pub incomplete: BTreeSet<u32>,
}

fn build_prompt(batch: &Batch) -> String {
    format!(
        r##"À partir du contenu Markdown ci-dessous (une ou plusieurs pages d'un document QCM), identifie chaque question par son numéro et extrais ses propositions de réponse (A, B, C, D, E).

Attention : les propositions d'une même question peuvent être coupées par un saut de page ("# Page N"). Rattache-les quand même à leur question. Recopie le texte des propositions mot pour mot, sans la mention Vrai/Faux ni la correction.

Contenu à analyser :
---
{}
---

Retourne un objet JSON avec la clé "questions_propositions" : une liste d'objets ayant
- "numero_question" (entier)
- "propositions" (objet avec les clés "A", "B", "C", "D", "E" ; null si une proposition est absente).

Exemple :
{{
  "questions_propositions": [
    {{"numero_question": 1, "propositions": {{"A": "Texte A", "B": "Texte B", "C": "Texte C", "D": "Texte D", "E": "Texte E"}}}}
  ]
}}"##,
        batch.text
    )
}

/// 在一段文本里按行扫描选项
///
/// 选项行以 A–E 加分隔符开头；内容延续到下一个选项行、空行或答案行为止。
pub fn scan_option_lines(text: &str) -> BTreeMap<Letter, String> {
    let mut options: BTreeMap<Letter, String> = BTreeMap::new();
    let mut current: Option<(Letter, String)> = None;

    fn flush(current: &mut Option<(Letter, String)>, options: &mut BTreeMap<Letter, String>) {
        if let Some((letter, text)) = current.take() {
            let text = text.trim().to_string();
            if !text.is_empty() && !options.contains_key(&letter) {
                options.insert(letter, text);
            }
        }
    }

    for line in text.lines() {
        if let Some(caps) = OPTION_LINE.captures(line) {
            flush(&mut current, &mut options);
            let letter = caps.get(1).and_then(|m| m.as_str().parse::<Letter>().ok());
            let body = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            current = letter.map(|l| (l, body.to_string()));
            continue;
        }
        if line.trim().is_empty() || STOP_LINE.is_match(line) {
            flush(&mut current, &mut options);
            continue;
        }
        if let Some((_, text)) = current.as_mut() {
            text.push(' ');
            text.push_str(line.trim());
        }
    }
    flush(&mut current, &mut options);
    options
}

/// 在全部页面中查找某题的选项
///
/// 页面按顺序拼接，题号标记之后的窗口可以跨过分页。窗口在下一个
/// 不同题号的标记处截断。
pub fn scan_options_for(document: &str, number: u32) -> BTreeMap<Letter, String> {
    let all_markers = markers::scan_markers(document);
    let mut found: BTreeMap<Letter, String> = BTreeMap::new();

    for (i, marker) in all_markers.iter().enumerate() {
        if marker.number != number {
            continue;
        }
        let next_other = all_markers[i + 1..]
            .iter()
            .find(|m| m.number != number)
            .map(|m| m.offset)
            .unwrap_or(document.len());
        let mut end = (marker.offset + OPTION_WINDOW).min(next_other);
        while !document.is_char_boundary(end) {
            end -= 1;
        }
        for (letter, text) in scan_option_lines(&document[marker.offset..end]) {
            found.entry(letter).or_insert(text);
        }
    }
    found
}

/// 选项抽取器
pub struct PropositionExtractor<'a> {
    caller: &'a ServiceCaller,
    label: &'a str,
}

impl<'a> PropositionExtractor<'a> {
    pub fn new(caller: &'a ServiceCaller, label: &'a str) -> Self {
        Self { caller, label }
    }

    /// 抽取一个批次；任何失败都返回空列表
    pub async fn extract_batch(&self, batch: &Batch) -> Vec<PropositionCandidate> {
        let call_label = format!(
            "[文档 {}] 选项抽取 批次 {} ({})",
            self.label,
            batch.index,
            batch.page_range()
        );
        let request = CompletionRequest::text(ModelTier::Standard, build_prompt(batch))
            .with_system(SYSTEM_PROMPT)
            .expect_json();

        let Some(raw) = self.caller.ask(&call_label, request).await else {
            return Vec::new();
        };

        match schema::parse_propositions(&raw) {
            Ok(candidates) => {
                debug!("{} 返回 {} 组选项", call_label, candidates.len());
                candidates
            }
            Err(err) => {
                self.caller.note_malformed(&call_label, &err, &raw);
                Vec::new()
            }
        }
    }

    /// 抽取已知题号的选项
    pub async fn extract(
        &self,
        batches: &[Batch],
        sections: &[PageSection],
        known_numbers: &BTreeSet<u32>,
    ) -> PropositionExtraction {
        let mut result = PropositionExtraction::default();

        for batch in batches {
            let candidates = self.extract_batch(batch).await;
            info!(
                "[文档 {}] 批次 {}/{} ({}) → {} 组选项",
                self.label,
                batch.index,
                batches.len(),
                batch.page_range(),
                candidates.len()
            );
            for candidate in candidates {
                if !known_numbers.contains(&candidate.number) {
                    debug!(
                        "[文档 {}] Q{} 不在已知题号中，忽略其选项",
                        self.label, candidate.number
                    );
                    continue;
                }
                result
                    .by_number
                    .entry(candidate.number)
                    .or_insert_with(|| PropositionCandidate::new(candidate.number))
                    .absorb(&candidate.options);
            }
        }

        let missing: Vec<u32> = known_numbers
            .iter()
            .copied()
            .filter(|n| result.by_number.get(n).map_or(true, |c| !c.is_complete()))
            .collect();

        if !missing.is_empty() {
            info!(
                "[文档 {}] 🔁 {} 道题选项不全，正则补扫",
                self.label,
                missing.len()
            );
            let document = sections
                .iter()
                .map(|s| s.own_text())
                .collect::<Vec<_>>()
                .join("\n\n");

            for number in missing {
                let scanned = scan_options_for(&document, number);
                let candidate = result
                    .by_number
                    .entry(number)
                    .or_insert_with(|| PropositionCandidate::new(number));
                let fill: BTreeMap<Letter, String> = scanned
                    .into_iter()
                    .filter(|(letter, _)| !candidate.options.contains_key(letter))
                    .collect();
                if !fill.is_empty() {
                    debug!(
                        "[文档 {}] Q{} 正则补上 {} 个选项",
                        self.label,
                        number,
                        fill.len()
                    );
                    candidate.absorb(&fill);
                    result.regex_filled.insert(number);
                }
            }
        }

        result.by_number.retain(|_, c| !c.options.is_empty());
        result.incomplete = known_numbers
            .iter()
            .copied()
            .filter(|n| result.by_number.get(n).map_or(true, |c| !c.is_complete()))
            .collect();

        for number in &result.incomplete {
            let missing: Vec<String> = result
                .by_number
                .get(number)
                .map(|c| c.missing_letters())
                .unwrap_or_else(|| Letter::ALL.to_vec())
                .iter()
                .map(|l| l.to_string())
                .collect();
            warn!(
                "[文档 {}] Q{} ⚠️ 选项不全，缺少 {}",
                self.label,
                number,
                missing.join(", ")
            );
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
    fn test_prompt_keeps_page_marker_and_example() {
        let batch = Batch { index: 1, pages: vec![1], text: "Q1. Énoncé".to_string() };
        let prompt = build_prompt(&batch);
        assert!(prompt.contains(r##"("# Page N")"##));
        assert!(prompt.contains(r#"{"A": "Texte A", "B": "Texte B""#));
        assert!(prompt.contains("---\nQ1. Énoncé\n---"));
    }

    #[test]
    fn test_scan_option_lines_with_continuation() {
        let text = "Q3. Concernant le rein :\nA. Il filtre\nle sang\nB) Il produit\n**C.** de l'urine\nD - rien\nE: tout\n\nRéponses justes : A, C";
        let options = scan_option_lines(text);
        assert_eq!(options.len(), 5);
        assert_eq!(options[&Letter::A], "Il filtre le sang");
        assert_eq!(options[&Letter::C], "de l'urine");
        assert_eq!(options[&Letter::D], "rien");
    }

    #[test]
    fn test_scan_stops_at_next_question() {
        let document = "Q1. Première\nA. un\nB. deux\nQ2. Seconde\nC. trois";
        let options = scan_options_for(document, 1);
        assert_eq!(
            options.keys().copied().collect::<Vec<_>>(),
            vec![Letter::A, Letter::B]
        );
    }

    #[test]
    fn test_scan_crosses_page_break() {
        let sections = [
            PageSection { page: 1, text: "Q4. Énoncé\nA. un\nB. deux".to_string(), overlap_len: 0 },
            PageSection { page: 2, text: "C. trois\nD. quatre\nE. cinq".to_string(), overlap_len: 0 },
        ];
        let document = sections.iter().map(|s| s.own_text()).collect::<Vec<_>>().join("\n\n");
        let options = scan_options_for(&document, 4);
        assert_eq!(options.len(), 5);
    }

    #[tokio::test]
    async fn test_regex_fills_only_missing_letters() {
        let completion = Arc::new(ScriptedCompletion::new().respond(
            r#"{"questions_propositions": [{"numero_question": 1, "propositions": {"A": "texte du service", "B": "deux", "C": null}}]}"#,
        ));
        let caller = ServiceCaller::new(completion, RetryPolicy::immediate(1), Duration::ZERO);
        let extractor = PropositionExtractor::new(&caller, "test");

        let sections = vec![PageSection {
            page: 1,
            text: "Q1. Énoncé\nA. texte regex\nB. deux\nC. trois\nD. quatre\nE. cinq".to_string(),
            overlap_len: 0,
        }];
        let batches = crate::services::batch_planner::plan_batches(&sections, 10_000);

        let result = extractor
            .extract(&batches, &sections, &BTreeSet::from([1]))
            .await;

        let q1 = &result.by_number[&1];
        assert!(q1.is_complete());
        assert_eq!(q1.options[&Letter::A], "texte du service");
        assert_eq!(q1.options[&Letter::E], "cinq");
        assert!(result.regex_filled.contains(&1));
        assert!(result.incomplete.is_empty());
    }
}
