//! 关系型存储
//!
//! 三张表：文档、题目、选项。核心只需要插入、存在性查询、更新和按 id 删除。

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::models::{
    DocumentKey, DocumentMeta, DocumentRecord, NewProposition, NewQuestion, PropositionRecord,
    QuestionRecord,
};

#[async_trait]
pub trait QuestionStore: Send + Sync {
    /// 按自然键 (类型, 单元, 学年) 查找文档
    async fn find_document_by_key(&self, key: &DocumentKey) -> StoreResult<Option<DocumentRecord>>;

    /// 按源文件名查找文档
    async fn find_document_by_filename(&self, filename: &str)
        -> StoreResult<Option<DocumentRecord>>;

    async fn insert_document(&self, meta: &DocumentMeta) -> StoreResult<DocumentRecord>;

    /// 把文档标记为另一文档的重复
    async fn mark_duplicate(&self, document_id: i64, original_id: i64) -> StoreResult<()>;

    async fn list_questions(&self, document_id: i64) -> StoreResult<Vec<QuestionRecord>>;

    /// 插入一组题目，整体成功或整体失败
    async fn insert_questions(&self, rows: &[NewQuestion]) -> StoreResult<Vec<QuestionRecord>>;

    async fn update_question_body(&self, question_id: i64, body: &str) -> StoreResult<()>;

    /// 文档下所有题目的选项，按 id 升序
    async fn list_propositions(&self, document_id: i64) -> StoreResult<Vec<PropositionRecord>>;

    /// 插入一组选项，整体成功或整体失败
    async fn insert_propositions(
        &self,
        rows: &[NewProposition],
    ) -> StoreResult<Vec<PropositionRecord>>;

    async fn set_correct(&self, proposition_id: i64, is_correct: bool) -> StoreResult<()>;

    async fn delete_proposition(&self, proposition_id: i64) -> StoreResult<()>;
}
