use serde::{Deserialize, Serialize};

/// 一页识别文本
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSection {
    /// 页码（来自页面标记，从 1 开始）
    pub page: usize,
    /// 页面文本，开头可能带有上一页末尾的重叠部分
    pub text: String,
    /// 开头重叠部分的字节长度
    pub overlap_len: usize,
}

impl PageSection {
    /// 去掉重叠部分后的本页文本
    pub fn own_text(&self) -> &str {
        self.text.get(self.overlap_len..).unwrap_or(&self.text)
    }
}

/// 一次补全调用提交的页面组
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// 批次序号（从 1 开始）
    pub index: usize,
    /// 包含的页码，保持原始顺序
    pub pages: Vec<usize>,
    /// 拼接后的文本
    pub text: String,
}

impl Batch {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// 日志用的页码范围
    pub fn page_range(&self) -> String {
        match (self.pages.first(), self.pages.last()) {
            (Some(first), Some(last)) if first == last => format!("p{}", first),
            (Some(first), Some(last)) => format!("p{}-{}", first, last),
            _ => "p?".to_string(),
        }
    }
}
