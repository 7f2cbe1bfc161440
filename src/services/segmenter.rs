//! 分页服务 - 业务能力层
//!
//! 按 `# Page N` 标记把识别文本切成页面，并在每页开头带上上一页末尾的一小段。

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::models::PageSection;

static PAGE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[ \t]*#{1,6}[ \t]*Page[ \t]+(\d+)[ \t]*$").expect("页面标记正则无效")
});

/// 分页结果
#[derive(Debug, Default)]
pub struct Segmentation {
    pub sections: Vec<PageSection>,
    /// 因内容为空被丢弃的页码
    pub dropped_pages: Vec<usize>,
}

/// 取文本末尾 `n` 个字符
fn tail_chars(text: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match text.char_indices().rev().nth(n - 1) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

/// 把识别文本切成页面
///
/// - 没有任何页面标记时整份文本作为第 1 页
/// - 第一个标记之前的内容并入第一页
/// - 两个相邻标记之间为空的页面被丢弃并告警
pub fn segment(text: &str, overlap_chars: usize) -> Segmentation {
    let markers: Vec<(usize, usize, usize)> = PAGE_MARKER
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let page = caps.get(1)?.as_str().parse().ok()?;
            Some((page, whole.start(), whole.end()))
        })
        .collect();

    if markers.is_empty() {
        let trimmed = text.trim();
        let sections = if trimmed.is_empty() {
            Vec::new()
        } else {
            vec![PageSection {
                page: 1,
                text: trimmed.to_string(),
                overlap_len: 0,
            }]
        };
        return Segmentation {
            sections,
            dropped_pages: Vec::new(),
        };
    }

    let preamble = text[..markers[0].1].trim();
    let mut result = Segmentation::default();
    let mut previous_own: Option<String> = None;

    for (i, &(page, _, body_start)) in markers.iter().enumerate() {
        let body_end = markers.get(i + 1).map(|m| m.1).unwrap_or(text.len());
        let mut own = text[body_start..body_end].trim().to_string();
        if i == 0 && !preamble.is_empty() {
            own = format!("{}\n\n{}", preamble, own).trim().to_string();
        }

        if own.is_empty() {
            warn!("⚠️ 第 {} 页内容为空，已丢弃", page);
            result.dropped_pages.push(page);
            continue;
        }

        let overlap = previous_own
            .as_deref()
            .map(|prev| tail_chars(prev, overlap_chars))
            .unwrap_or("");
        let text = if overlap.is_empty() {
            own.clone()
        } else {
            format!("{}\n{}", overlap, own)
        };
        let overlap_len = text.len() - own.len();

        result.sections.push(PageSection {
            page,
            text,
            overlap_len,
        });
        previous_own = Some(own);
    }

    debug!(
        "分页完成: {} 页，丢弃 {} 页",
        result.sections.len(),
        result.dropped_pages.len()
    );
    result
}

/// 把页面重新拼成带标记的文本
pub fn join_pages(pages: &[String]) -> String {
    pages
        .iter()
        .enumerate()
        .map(|(i, markdown)| format!("# Page {}\n\n{}\n\n", i + 1, markdown))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pages_with_overlap() {
        let text = "# Page 1\n\nQ1. Quelle est la capitale ?\nA. Paris\n# Page 2\n\nB. Lyon\nC. Nice";
        let seg = segment(text, 8);
        assert_eq!(seg.sections.len(), 2);
        assert_eq!(seg.sections[0].overlap_len, 0);

        let second = &seg.sections[1];
        assert_eq!(second.page, 2);
        assert!(second.text.starts_with("A. Paris\n"));
        assert_eq!(second.own_text(), "B. Lyon\nC. Nice");
    }

    #[test]
    fn test_no_marker_is_single_section() {
        let seg = segment("  Q1. Seule page\nA. oui  ", 200);
        assert_eq!(seg.sections.len(), 1);
        assert_eq!(seg.sections[0].page, 1);
        assert_eq!(seg.sections[0].text, "Q1. Seule page\nA. oui");
    }

    #[test]
    fn test_empty_section_dropped() {
        let text = "# Page 1\nQ1. a\n# Page 2\n\n   \n# Page 3\nQ2. b";
        let seg = segment(text, 200);
        let pages: Vec<usize> = seg.sections.iter().map(|s| s.page).collect();
        assert_eq!(pages, vec![1, 3]);
        assert_eq!(seg.dropped_pages, vec![2]);
        // 丢弃空页后，重叠来自上一张非空页
        assert!(seg.sections[1].text.starts_with("Q1. a\n"));
    }

    #[test]
    fn test_overlap_is_char_boundary_safe() {
        assert_eq!(tail_chars("éléphant", 4), "hant");
        assert_eq!(tail_chars("été", 10), "été");
        assert_eq!(tail_chars("été", 0), "");
    }

    #[test]
    fn test_join_pages_round_trips_page_numbers() {
        let joined = join_pages(&["un".to_string(), "deux".to_string()]);
        let seg = segment(&joined, 0);
        assert_eq!(seg.sections.len(), 2);
        assert_eq!(seg.sections[1].own_text(), "deux");
    }
}
