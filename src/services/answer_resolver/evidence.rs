//! 答案判定用的文本证据
//!
//! 构建一次，所有检测器共用：拼接后的全文、题号标记、每题区间、
//! 显式答案行（已按"向前最近的题号"归属）以及页面图片。

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::models::{Letter, LetterSet, PageSection};
use crate::services::markers::{self, Marker};

static ANSWER_KEY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^[\s*>#_\-]*(?:\*\*)?\s*(?:bonnes?\s+)?r[ée]ponses?\s*(?:justes?|correctes?|exactes?|vraies?)?\s*(?:\*\*)?\s*:\s*(?:\*\*)?\s*(.*)$",
    )
    .expect("答案行正则无效")
});

static COMPACT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:(?:Q|Question)\s*)?(\d{1,3})\s*[:=\-–]\s*([A-E](?:[\s,;/]*[A-E]){0,4})\s*\.?\s*$",
    )
    .expect("紧凑答案正则无效")
});

/// 一道题在判定阶段可见的内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionView {
    pub number: u32,
    pub body: String,
    pub propositions: BTreeMap<Letter, String>,
}

/// 显式答案行的解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerKey {
    Letters(LetterSet),
    Ambiguous(String),
}

/// 解析答案行冒号后面的部分
///
/// 遇到第一个不是字母组的词、括号或句号就停止（后面通常是解析文字）。
pub fn parse_key_letters(rest: &str) -> AnswerKey {
    let mut set = LetterSet::new();
    let mut letter_tokens = 0usize;
    let mut foreign = Vec::new();

    for raw in rest.split(|c: char| c == ',' || c == ';' || c == '/' || c.is_whitespace()) {
        if raw.starts_with('(') || raw.starts_with('[') {
            break;
        }
        let token = raw.trim_matches(|c: char| !c.is_alphanumeric());
        if token.is_empty() || token.eq_ignore_ascii_case("et") {
            continue;
        }
        let is_letter_group = token.len() <= 5 && token.chars().all(|c| c.is_ascii_uppercase());
        if !is_letter_group {
            break;
        }
        let ends_sentence = raw.trim_end_matches('*').ends_with('.');
        for c in token.chars() {
            letter_tokens += 1;
            match Letter::from_char(c) {
                Some(letter) => {
                    set.insert(letter);
                }
                None => foreign.push(c),
            }
        }
        if ends_sentence {
            break;
        }
    }

    if !foreign.is_empty() {
        AnswerKey::Ambiguous(format!("答案行含有 A–E 以外的字母: {:?}", foreign))
    } else if letter_tokens > 5 {
        AnswerKey::Ambiguous(format!("答案行有 {} 个字母", letter_tokens))
    } else if set.is_empty() {
        AnswerKey::Ambiguous("答案行没有有效字母".to_string())
    } else {
        AnswerKey::Letters(set)
    }
}

/// 检测器共用的证据
#[derive(Debug, Default)]
pub struct Evidence {
    /// 各页正文按顺序拼接
    pub text: String,
    /// (页码, 该页在 text 中的起始字节)
    page_starts: Vec<(usize, usize)>,
    pub markers: Vec<Marker>,
    pub spans: BTreeMap<u32, Vec<(usize, usize)>>,
    /// 显式答案行，按题号归属
    pub answer_keys: BTreeMap<u32, AnswerKey>,
    /// 被显式答案行占用的行（行首字节偏移）
    pub consumed_lines: BTreeSet<usize>,
    /// 紧凑答案行：题号 → (行首偏移, 字母)
    pub compact_lines: BTreeMap<u32, Vec<(usize, LetterSet)>>,
    pub page_images: BTreeMap<usize, PathBuf>,
}

/// 带行首偏移的逐行迭代
fn lines_with_offsets(text: &str) -> impl Iterator<Item = (usize, &str)> {
    let mut offset = 0;
    text.split_inclusive('\n').map(move |line| {
        let start = offset;
        offset += line.len();
        (start, line.trim_end_matches(['\n', '\r']))
    })
}

impl Evidence {
    pub fn build(sections: &[PageSection], page_images: BTreeMap<usize, PathBuf>) -> Self {
        let mut text = String::new();
        let mut page_starts = Vec::with_capacity(sections.len());
        for section in sections {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            page_starts.push((section.page, text.len()));
            text.push_str(section.own_text());
        }

        let markers = markers::scan_markers(&text);
        let spans = markers::question_spans(&text);

        let mut evidence = Self {
            text,
            page_starts,
            markers,
            spans,
            page_images,
            ..Self::default()
        };
        evidence.index_answer_lines();
        evidence
    }

    /// 扫描显式答案行和紧凑答案行
    fn index_answer_lines(&mut self) {
        let mut keys: BTreeMap<u32, AnswerKey> = BTreeMap::new();
        let mut consumed = BTreeSet::new();
        let mut compact: BTreeMap<u32, Vec<(usize, LetterSet)>> = BTreeMap::new();

        for (offset, line) in lines_with_offsets(&self.text) {
            let key_rest = ANSWER_KEY_LINE
                .captures(line)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str())
                .filter(|rest| rest.chars().any(|c| c.is_alphanumeric()));
            if let Some(rest) = key_rest {
                consumed.insert(offset);
                // 答案行写在题目之后：向前找最近的题号
                let Some(marker) = markers::nearest_marker_before(&self.markers, offset) else {
                    debug!("答案行之前没有题号标记，忽略: {}", line);
                    continue;
                };
                let parsed = parse_key_letters(rest);
                let merged = match (keys.remove(&marker.number), parsed) {
                    (None, parsed) => parsed,
                    (Some(AnswerKey::Letters(a)), AnswerKey::Letters(b)) if a == b => {
                        AnswerKey::Letters(a)
                    }
                    (Some(AnswerKey::Letters(a)), AnswerKey::Letters(b)) => AnswerKey::Ambiguous(
                        format!("多条答案行不一致: {} / {}", a, b),
                    ),
                    (Some(AnswerKey::Ambiguous(reason)), _) | (Some(_), AnswerKey::Ambiguous(reason)) => {
                        AnswerKey::Ambiguous(reason)
                    }
                };
                keys.insert(marker.number, merged);
                continue;
            }

            if let Some(caps) = COMPACT_LINE.captures(line) {
                let Some(number) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) else {
                    continue;
                };
                let letters: LetterSet = caps
                    .get(2)
                    .map_or("", |m| m.as_str())
                    .chars()
                    .filter_map(Letter::from_char)
                    .collect();
                compact.entry(number).or_default().push((offset, letters));
            }
        }

        self.answer_keys = keys;
        self.consumed_lines = consumed;
        self.compact_lines = compact;
    }

    /// 某题的所有文本区间
    pub fn span_texts(&self, number: u32) -> Vec<&str> {
        self.spans
            .get(&number)
            .map(|spans| {
                spans
                    .iter()
                    .filter_map(|&(start, end)| self.text.get(start..end))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn page_count(&self) -> usize {
        self.page_starts.len()
    }

    /// 偏移所在的页码
    pub fn page_of(&self, offset: usize) -> Option<usize> {
        self.page_starts
            .iter()
            .rev()
            .find(|(_, start)| *start <= offset)
            .map(|(page, _)| *page)
    }

    /// 出现过该题号标记的页，按出现顺序去重
    pub fn pages_with_marker(&self, number: u32) -> Vec<usize> {
        let mut pages = Vec::new();
        for marker in self.markers.iter().filter(|m| m.number == number) {
            if let Some(page) = self.page_of(marker.offset) {
                if !pages.contains(&page) {
                    pages.push(page);
                }
            }
        }
        pages
    }

    /// 按每页题量估算题目所在页（估算页及前后各一页）
    pub fn estimated_pages(&self, number: u32) -> Vec<usize> {
        let page_count = self.page_count();
        let question_count = self.spans.keys().max().copied().unwrap_or(0) as usize;
        if page_count == 0 || question_count == 0 {
            return Vec::new();
        }
        let per_page = question_count as f64 / page_count as f64;
        let index = ((number as f64 / per_page).ceil() as usize).clamp(1, page_count);

        let mut candidates = vec![index];
        if index > 1 {
            candidates.push(index - 1);
        }
        if index < page_count {
            candidates.push(index + 1);
        }
        candidates
            .into_iter()
            .map(|i| self.page_starts[i - 1].0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evidence(pages: &[&str]) -> Evidence {
        let sections: Vec<PageSection> = pages
            .iter()
            .enumerate()
            .map(|(i, text)| PageSection {
                page: i + 1,
                text: text.to_string(),
                overlap_len: 0,
            })
            .collect();
        Evidence::build(&sections, BTreeMap::new())
    }

    #[test]
    fn test_parse_key_letters() {
        assert_eq!(
            parse_key_letters("A, C, E. Le rein filtre"),
            AnswerKey::Letters([Letter::A, Letter::C, Letter::E].into_iter().collect())
        );
        assert_eq!(
            parse_key_letters("BD"),
            AnswerKey::Letters([Letter::B, Letter::D].into_iter().collect())
        );
        assert_eq!(
            parse_key_letters("A, C. E est fausse car le rein ne stocke rien"),
            AnswerKey::Letters([Letter::A, Letter::C].into_iter().collect())
        );
        assert_eq!(
            parse_key_letters("A, C (B est faux)"),
            AnswerKey::Letters([Letter::A, Letter::C].into_iter().collect())
        );
        assert!(matches!(parse_key_letters("aucune"), AnswerKey::Ambiguous(_)));
        assert!(matches!(parse_key_letters("A, F"), AnswerKey::Ambiguous(_)));
        assert!(matches!(
            parse_key_letters("A, B, C, D, E, A"),
            AnswerKey::Ambiguous(_)
        ));
    }

    #[test]
    fn test_answer_key_attaches_to_preceding_question() {
        let ev = evidence(&[
            "Q1. Énoncé un\nA. a\nB. b\nRéponses justes : A, B\nQ2. Énoncé deux\nA. a\n**Réponse exacte :** C",
        ]);
        assert_eq!(
            ev.answer_keys[&1],
            AnswerKey::Letters([Letter::A, Letter::B].into_iter().collect())
        );
        assert_eq!(
            ev.answer_keys[&2],
            AnswerKey::Letters([Letter::C].into_iter().collect())
        );
        assert_eq!(ev.consumed_lines.len(), 2);
    }

    #[test]
    fn test_conflicting_answer_lines_are_ambiguous() {
        let ev = evidence(&["Q3. Énoncé\nRéponses justes : A\nRéponses justes : B"]);
        assert!(matches!(ev.answer_keys[&3], AnswerKey::Ambiguous(_)));
    }

    #[test]
    fn test_bare_answer_header_is_not_a_key_line() {
        let ev = evidence(&["Q1. Énoncé un\nA. a\nQ2. Énoncé deux\nA. a\n\nRéponses :\n1 : A\n2 : B, D"]);
        assert!(ev.answer_keys.is_empty());
        assert!(ev.consumed_lines.is_empty());
        assert_eq!(ev.compact_lines[&2][0].1.to_string(), "B, D");
    }

    #[test]
    fn test_compact_lines_indexed() {
        let ev = evidence(&["Q1. Énoncé\nA. a", "Corrigé rapide\n1 : A, C\n2- BD\n"]);
        assert_eq!(ev.compact_lines[&1][0].1.to_string(), "A, C");
        assert_eq!(ev.compact_lines[&2][0].1.to_string(), "B, D");
    }

    #[test]
    fn test_pages_for_question() {
        let ev = evidence(&["Q1. a\nQ2. b", "Q3. c\nQ4. d", "Q5. e\nQ6. f"]);
        assert_eq!(ev.pages_with_marker(4), vec![2]);
        assert_eq!(ev.estimated_pages(5), vec![3, 2]);
        assert_eq!(ev.estimated_pages(1), vec![1, 2]);
    }
}
