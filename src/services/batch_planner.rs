//! 批次规划
//!
//! 页面按顺序装箱，批次边界只落在页面之间。

use crate::models::{Batch, PageSection};

/// 页面在批次文本中的写法
fn render_section(section: &PageSection) -> String {
    format!("# Page {}\n\n{}\n\n", section.page, section.text)
}

/// 按字符预算把页面分批
///
/// 单页超过预算时独占一个批次，不会被切开。
pub fn plan_batches(sections: &[PageSection], char_budget: usize) -> Vec<Batch> {
    let mut batches: Vec<Batch> = Vec::new();
    let mut pages = Vec::new();
    let mut text = String::new();
    let mut chars = 0usize;

    for section in sections {
        let rendered = render_section(section);
        let len = rendered.chars().count();

        if !pages.is_empty() && chars + len > char_budget {
            batches.push(Batch {
                index: batches.len() + 1,
                pages: std::mem::take(&mut pages),
                text: std::mem::take(&mut text),
            });
            chars = 0;
        }

        pages.push(section.page);
        text.push_str(&rendered);
        chars += len;
    }

    if !pages.is_empty() {
        batches.push(Batch {
            index: batches.len() + 1,
            pages,
            text,
        });
    }
    batches
}

/// 整份文档作为一个批次
pub fn whole_document(sections: &[PageSection]) -> Batch {
    Batch {
        index: 1,
        pages: sections.iter().map(|s| s.page).collect(),
        text: sections.iter().map(render_section).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(page: usize, len: usize) -> PageSection {
        PageSection {
            page,
            text: "x".repeat(len),
            overlap_len: 0,
        }
    }

    #[test]
    fn test_batches_respect_budget_and_order() {
        let sections = vec![section(1, 40), section(2, 40), section(3, 40), section(4, 40)];
        let batches = plan_batches(&sections, 120);

        let pages: Vec<Vec<usize>> = batches.iter().map(|b| b.pages.clone()).collect();
        assert_eq!(pages, vec![vec![1, 2], vec![3, 4]]);
        assert!(batches.iter().all(|b| b.char_len() <= 120));
        assert_eq!(batches[1].index, 2);
        assert_eq!(batches[1].page_range(), "p3-4");
    }

    #[test]
    fn test_oversized_section_is_not_split() {
        let sections = vec![section(1, 10), section(2, 500), section(3, 10)];
        let batches = plan_batches(&sections, 100);
        let pages: Vec<Vec<usize>> = batches.iter().map(|b| b.pages.clone()).collect();
        assert_eq!(pages, vec![vec![1], vec![2], vec![3]]);
    }

    #[test]
    fn test_empty_input() {
        assert!(plan_batches(&[], 100).is_empty());
    }
}
