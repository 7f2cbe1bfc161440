use std::collections::BTreeMap;

use crate::models::letter::Letter;

/// 题目候选（题号 + 题干）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionCandidate {
    pub number: u32,
    pub body: String,
}

impl QuestionCandidate {
    pub fn new(number: u32, body: impl Into<String>) -> Self {
        Self {
            number,
            body: body.into(),
        }
    }
}

/// 某一题的选项候选
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PropositionCandidate {
    pub number: u32,
    pub options: BTreeMap<Letter, String>,
}

impl PropositionCandidate {
    pub fn new(number: u32) -> Self {
        Self {
            number,
            options: BTreeMap::new(),
        }
    }

    /// 是否五个选项都已齐全
    pub fn is_complete(&self) -> bool {
        Letter::ALL.iter().all(|l| self.options.contains_key(l))
    }

    /// 尚缺的选项字母
    pub fn missing_letters(&self) -> Vec<Letter> {
        Letter::ALL
            .iter()
            .copied()
            .filter(|l| !self.options.contains_key(l))
            .collect()
    }

    /// 合并另一个候选：缺的字母直接补上，重复的字母保留更长的文本
    pub fn absorb(&mut self, other: &BTreeMap<Letter, String>) {
        for (letter, text) in other {
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            match self.options.get(letter) {
                Some(existing) if existing.chars().count() >= text.chars().count() => {}
                _ => {
                    self.options.insert(*letter, text.to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absorb_prefers_longer_text() {
        let mut candidate = PropositionCandidate::new(4);
        candidate.absorb(&BTreeMap::from([
            (Letter::A, "court".to_string()),
            (Letter::B, "texte B".to_string()),
        ]));
        candidate.absorb(&BTreeMap::from([
            (Letter::A, "beaucoup plus long".to_string()),
            (Letter::C, "  ".to_string()),
        ]));

        assert_eq!(candidate.options[&Letter::A], "beaucoup plus long");
        assert_eq!(candidate.options[&Letter::B], "texte B");
        assert_eq!(
            candidate.missing_letters(),
            vec![Letter::C, Letter::D, Letter::E]
        );
        assert!(!candidate.is_complete());
    }
}
