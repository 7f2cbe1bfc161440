use serde::{Deserialize, Serialize};

/// 文档元数据（来自文件名和首页文本）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    /// 所属院校
    pub institution: String,
    /// 教学单元，如 "UE3"
    pub unit: Option<String>,
    /// 文档类型，如 "Concours Blanc N°1"
    pub doc_type: String,
    /// 学年，如 "2021 / 2022"
    pub year: Option<String>,
    /// 源文件名
    pub filename: String,
    /// 源 URL
    pub source_url: String,
}

impl DocumentMeta {
    /// 自然键
    pub fn key(&self) -> DocumentKey {
        DocumentKey {
            doc_type: self.doc_type.clone(),
            unit: self.unit.clone(),
            year: self.year.clone(),
        }
    }

    /// 日志用的简短标签
    pub fn label(&self) -> String {
        self.filename
            .rsplit_once('.')
            .map(|(stem, _)| stem.to_string())
            .unwrap_or_else(|| self.filename.clone())
    }
}

/// 文档自然键：(类型, 单元, 学年)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    pub doc_type: String,
    pub unit: Option<String>,
    pub year: Option<String>,
}

impl DocumentKey {
    /// 单元和学年都已知时，自然键才足以区分文档
    pub fn is_complete(&self) -> bool {
        self.unit.is_some() && self.year.is_some() && self.doc_type != "Unknown"
    }
}

impl std::fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} / {} / {}",
            self.doc_type,
            self.unit.as_deref().unwrap_or("?"),
            self.year.as_deref().unwrap_or("?")
        )
    }
}
