//! 存储层记录类型

use crate::models::document::{DocumentKey, DocumentMeta};
use crate::models::letter::Letter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRecord {
    pub id: i64,
    pub institution: String,
    pub key: DocumentKey,
    pub filename: String,
    pub source_url: String,
    /// 被标记为重复时指向原文档
    pub duplicate_of: Option<i64>,
}

impl DocumentRecord {
    pub fn from_meta(id: i64, meta: &DocumentMeta) -> Self {
        Self {
            id,
            institution: meta.institution.clone(),
            key: meta.key(),
            filename: meta.filename.clone(),
            source_url: meta.source_url.clone(),
            duplicate_of: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionRecord {
    pub id: i64,
    pub document_id: i64,
    pub number: u32,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQuestion {
    pub document_id: i64,
    pub number: u32,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropositionRecord {
    pub id: i64,
    pub question_id: i64,
    pub letter: Letter,
    pub text: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProposition {
    pub question_id: i64,
    pub letter: Letter,
    pub text: String,
}
