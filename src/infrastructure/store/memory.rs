use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::QuestionStore;
use crate::error::{StoreError, StoreResult};
use crate::models::{
    DocumentKey, DocumentMeta, DocumentRecord, NewProposition, NewQuestion, PropositionRecord,
    QuestionRecord,
};

#[derive(Default)]
struct Tables {
    next_id: i64,
    documents: Vec<DocumentRecord>,
    questions: Vec<QuestionRecord>,
    propositions: Vec<PropositionRecord>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// 内存存储
///
/// 试运行和测试使用。不做唯一约束，重复检查完全依赖调用方。
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("内存存储锁已损坏".to_string()))
    }

    pub fn document_count(&self) -> usize {
        self.lock().map(|t| t.documents.len()).unwrap_or(0)
    }

    pub fn question_count(&self) -> usize {
        self.lock().map(|t| t.questions.len()).unwrap_or(0)
    }

    pub fn proposition_count(&self) -> usize {
        self.lock().map(|t| t.propositions.len()).unwrap_or(0)
    }
}

#[async_trait]
impl QuestionStore for MemoryStore {
    async fn find_document_by_key(&self, key: &DocumentKey) -> StoreResult<Option<DocumentRecord>> {
        let tables = self.lock()?;
        Ok(tables.documents.iter().find(|d| &d.key == key).cloned())
    }

    async fn find_document_by_filename(
        &self,
        filename: &str,
    ) -> StoreResult<Option<DocumentRecord>> {
        let tables = self.lock()?;
        Ok(tables
            .documents
            .iter()
            .find(|d| d.filename == filename)
            .cloned())
    }

    async fn insert_document(&self, meta: &DocumentMeta) -> StoreResult<DocumentRecord> {
        let mut tables = self.lock()?;
        let record = DocumentRecord::from_meta(tables.allocate_id(), meta);
        tables.documents.push(record.clone());
        Ok(record)
    }

    async fn mark_duplicate(&self, document_id: i64, original_id: i64) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let doc = tables
            .documents
            .iter_mut()
            .find(|d| d.id == document_id)
            .ok_or(StoreError::NotFound {
                table: "documents",
                id: document_id,
            })?;
        doc.duplicate_of = Some(original_id);
        Ok(())
    }

    async fn list_questions(&self, document_id: i64) -> StoreResult<Vec<QuestionRecord>> {
        let tables = self.lock()?;
        let mut rows: Vec<QuestionRecord> = tables
            .questions
            .iter()
            .filter(|q| q.document_id == document_id)
            .cloned()
            .collect();
        rows.sort_by_key(|q| q.number);
        Ok(rows)
    }

    async fn insert_questions(&self, rows: &[NewQuestion]) -> StoreResult<Vec<QuestionRecord>> {
        let mut tables = self.lock()?;
        let mut inserted = Vec::with_capacity(rows.len());
        for row in rows {
            let record = QuestionRecord {
                id: tables.allocate_id(),
                document_id: row.document_id,
                number: row.number,
                body: row.body.clone(),
            };
            tables.questions.push(record.clone());
            inserted.push(record);
        }
        Ok(inserted)
    }

    async fn update_question_body(&self, question_id: i64, body: &str) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let question = tables
            .questions
            .iter_mut()
            .find(|q| q.id == question_id)
            .ok_or(StoreError::NotFound {
                table: "questions",
                id: question_id,
            })?;
        question.body = body.to_string();
        Ok(())
    }

    async fn list_propositions(&self, document_id: i64) -> StoreResult<Vec<PropositionRecord>> {
        let tables = self.lock()?;
        let question_ids: Vec<i64> = tables
            .questions
            .iter()
            .filter(|q| q.document_id == document_id)
            .map(|q| q.id)
            .collect();
        let mut rows: Vec<PropositionRecord> = tables
            .propositions
            .iter()
            .filter(|p| question_ids.contains(&p.question_id))
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.id);
        Ok(rows)
    }

    async fn insert_propositions(
        &self,
        rows: &[NewProposition],
    ) -> StoreResult<Vec<PropositionRecord>> {
        let mut tables = self.lock()?;
        let mut inserted = Vec::with_capacity(rows.len());
        for row in rows {
            let record = PropositionRecord {
                id: tables.allocate_id(),
                question_id: row.question_id,
                letter: row.letter,
                text: row.text.clone(),
                is_correct: false,
            };
            tables.propositions.push(record.clone());
            inserted.push(record);
        }
        Ok(inserted)
    }

    async fn set_correct(&self, proposition_id: i64, is_correct: bool) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let proposition = tables
            .propositions
            .iter_mut()
            .find(|p| p.id == proposition_id)
            .ok_or(StoreError::NotFound {
                table: "propositions",
                id: proposition_id,
            })?;
        proposition.is_correct = is_correct;
        Ok(())
    }

    async fn delete_proposition(&self, proposition_id: i64) -> StoreResult<()> {
        let mut tables = self.lock()?;
        tables.propositions.retain(|p| p.id != proposition_id);
        Ok(())
    }
}
