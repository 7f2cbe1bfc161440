//! 题号标记扫描
//!
//! 强标记：`Q12`、`Q.12`、`Question 12`；弱标记：行首的 `12.` / `12)`。
//! 文本里只要出现强标记，就只使用强标记。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

static STRONG_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)(?:^|[^\p{L}\p{N}])((?:Q|[Qq]uestion|QUESTION)\s*(?:[Nn]°\s*)?\.?\s*(\d{1,3}))\b",
    )
    .expect("题号正则无效")
});

static WEAK_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[\s*#>]*((\d{1,3})\s*[\.\)])\s+\S").expect("题号正则无效")
});

/// 文本中的一个题号标记
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker {
    pub number: u32,
    /// 标记在文本中的字节偏移
    pub offset: usize,
}

fn collect(re: &Regex, text: &str) -> Vec<Marker> {
    re.captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(1)?;
            let number: u32 = caps.get(2)?.as_str().parse().ok()?;
            (number > 0).then_some(Marker {
                number,
                offset: whole.start(),
            })
        })
        .collect()
}

/// 扫描题号标记，按出现顺序返回
pub fn scan_markers(text: &str) -> Vec<Marker> {
    let strong = collect(&STRONG_MARKER, text);
    if !strong.is_empty() {
        return strong;
    }
    collect(&WEAK_MARKER, text)
}

/// 文本中出现过的题号
pub fn marker_numbers(text: &str) -> BTreeSet<u32> {
    scan_markers(text).into_iter().map(|m| m.number).collect()
}

/// 文本是否含有强题号标记
pub fn has_strong_marker(text: &str) -> bool {
    STRONG_MARKER.is_match(text)
}

/// [min, max] 范围内缺失的题号
pub fn find_gaps<'a>(numbers: impl IntoIterator<Item = &'a u32>) -> BTreeSet<u32> {
    let present: BTreeSet<u32> = numbers.into_iter().copied().collect();
    match (present.first(), present.last()) {
        (Some(&min), Some(&max)) => (min..=max).filter(|n| !present.contains(n)).collect(),
        _ => BTreeSet::new(),
    }
}

/// 每个题号在文本中覆盖的字节区间
///
/// 区间从标记开始，到下一个不同题号的标记为止。同一题号出现多次
/// （例如题目区和答案区各一次）时保留多个区间。
pub fn question_spans(text: &str) -> BTreeMap<u32, Vec<(usize, usize)>> {
    let markers = scan_markers(text);
    let mut spans: BTreeMap<u32, Vec<(usize, usize)>> = BTreeMap::new();

    let mut i = 0;
    while i < markers.len() {
        let current = markers[i];
        let mut j = i + 1;
        while j < markers.len() && markers[j].number == current.number {
            j += 1;
        }
        let end = markers.get(j).map(|m| m.offset).unwrap_or(text.len());
        spans
            .entry(current.number)
            .or_default()
            .push((current.offset, end));
        i = j;
    }
    spans
}

/// 偏移之前最近的题号标记
pub fn nearest_marker_before(markers: &[Marker], offset: usize) -> Option<Marker> {
    markers.iter().rev().find(|m| m.offset <= offset).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strong_markers_win_over_weak() {
        let text = "Q1. Énoncé\n1. une liste\nQuestion 2 : autre\nQ.3 encore\nQCM 9";
        let numbers: Vec<u32> = scan_markers(text).iter().map(|m| m.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_weak_markers_when_no_strong() {
        let text = "1. Première question\nA. oui\n2) Deuxième question\n";
        assert_eq!(marker_numbers(text), BTreeSet::from([1, 2]));
    }

    #[test]
    fn test_gap_is_exactly_missing_marker() {
        let text: String = (1..=10)
            .filter(|n| *n != 7)
            .map(|n| format!("Q{}. Énoncé de la question {}\nA. a\nB. b\n\n", n, n))
            .collect();
        let numbers = marker_numbers(&text);
        assert_eq!(find_gaps(&numbers), BTreeSet::from([7]));
    }

    #[test]
    fn test_question_spans_split_at_next_marker() {
        let text = "Q1 aaa\nQ2 bbb\nQ1 correction";
        let spans = question_spans(text);
        assert_eq!(spans[&1].len(), 2);
        assert_eq!(&text[spans[&2][0].0..spans[&2][0].1], "Q2 bbb\n");
        assert_eq!(&text[spans[&1][1].0..spans[&1][1].1], "Q1 correction");
    }

    #[test]
    fn test_nearest_marker_before() {
        let markers = scan_markers("Q1 x\nQ2 y\nRéponses justes : A");
        let found = nearest_marker_before(&markers, 12).unwrap();
        assert_eq!(found.number, 2);
    }
}
