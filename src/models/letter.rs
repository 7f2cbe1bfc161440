use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// 选项字母
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum Letter {
    A,
    B,
    C,
    D,
    E,
}

impl Letter {
    /// 按顺序排列的全部五个字母
    pub const ALL: [Letter; 5] = [Letter::A, Letter::B, Letter::C, Letter::D, Letter::E];

    /// 获取字符形式
    pub fn as_char(self) -> char {
        match self {
            Letter::A => 'A',
            Letter::B => 'B',
            Letter::C => 'C',
            Letter::D => 'D',
            Letter::E => 'E',
        }
    }

    /// 从字符解析（大小写不敏感）
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'A' => Some(Letter::A),
            'B' => Some(Letter::B),
            'C' => Some(Letter::C),
            'D' => Some(Letter::D),
            'E' => Some(Letter::E),
            _ => None,
        }
    }
}

/// 不是 A–E 中的单个字母
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("无效的选项字母: {0}")]
pub struct InvalidLetter(pub String);

impl FromStr for Letter {
    type Err = InvalidLetter;

    /// 只接受单个字母，忽略首尾空白
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::from_char(c),
            _ => None,
        }
        .ok_or_else(|| InvalidLetter(s.to_string()))
    }
}

impl fmt::Display for Letter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// 正确选项集合
///
/// 有序、去重；为空表示"没有结论"，而不是"全部错误"。
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LetterSet(BTreeSet<Letter>);

impl LetterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, letter: Letter) -> bool {
        self.0.insert(letter)
    }

    pub fn contains(&self, letter: Letter) -> bool {
        self.0.contains(&letter)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Letter> + '_ {
        self.0.iter().copied()
    }

    /// 五个字母中不在集合里的部分
    pub fn complement(&self) -> LetterSet {
        Letter::ALL.iter().copied().filter(|l| !self.contains(*l)).collect()
    }

    /// 集合大小是否在可接受的 1..=5 范围内
    pub fn is_plausible(&self) -> bool {
        (1..=5).contains(&self.len())
    }
}

impl FromIterator<Letter> for LetterSet {
    fn from_iter<I: IntoIterator<Item = Letter>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for LetterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "∅");
        }
        let letters: Vec<String> = self.0.iter().map(|l| l.to_string()).collect();
        write!(f, "{}", letters.join(", "))
    }
}
