use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::QuestionStore;
use crate::error::{StoreError, StoreResult};
use crate::models::{
    DocumentKey, DocumentMeta, DocumentRecord, Letter, NewProposition, NewQuestion,
    PropositionRecord, QuestionRecord,
};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY,
        institution TEXT NOT NULL,
        doc_type TEXT NOT NULL,
        unit TEXT,
        year TEXT,
        filename TEXT NOT NULL,
        source_url TEXT NOT NULL,
        is_duplicate INTEGER NOT NULL DEFAULT 0,
        original_document_id INTEGER,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        FOREIGN KEY (original_document_id) REFERENCES documents(id)
    );

    CREATE TABLE IF NOT EXISTS questions (
        id INTEGER PRIMARY KEY,
        document_id INTEGER NOT NULL,
        number INTEGER NOT NULL,
        body TEXT NOT NULL,
        FOREIGN KEY (document_id) REFERENCES documents(id),
        UNIQUE(document_id, number)
    );

    CREATE TABLE IF NOT EXISTS propositions (
        id INTEGER PRIMARY KEY,
        question_id INTEGER NOT NULL,
        letter TEXT NOT NULL,
        text TEXT NOT NULL,
        is_correct INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY (question_id) REFERENCES questions(id),
        UNIQUE(question_id, letter)
    );

    CREATE INDEX IF NOT EXISTS idx_documents_key ON documents(doc_type, unit, year);
    CREATE INDEX IF NOT EXISTS idx_documents_filename ON documents(filename);
"#;

const DOCUMENT_COLUMNS: &str =
    "id, institution, doc_type, unit, year, filename, source_url, original_document_id";

/// SQLite 存储
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", path.display(), e)))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("连接锁已损坏".to_string()))
    }
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<DocumentRecord> {
    Ok(DocumentRecord {
        id: row.get(0)?,
        institution: row.get(1)?,
        key: DocumentKey {
            doc_type: row.get(2)?,
            unit: row.get(3)?,
            year: row.get(4)?,
        },
        filename: row.get(5)?,
        source_url: row.get(6)?,
        duplicate_of: row.get(7)?,
    })
}

fn question_from_row(row: &Row<'_>) -> rusqlite::Result<QuestionRecord> {
    Ok(QuestionRecord {
        id: row.get(0)?,
        document_id: row.get(1)?,
        number: row.get(2)?,
        body: row.get(3)?,
    })
}

fn proposition_from_row(row: &Row<'_>) -> rusqlite::Result<PropositionRecord> {
    let letter: String = row.get(2)?;
    let letter = letter.parse::<Letter>().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(err))
    })?;
    Ok(PropositionRecord {
        id: row.get(0)?,
        question_id: row.get(1)?,
        letter,
        text: row.get(3)?,
        is_correct: row.get(4)?,
    })
}

#[async_trait]
impl QuestionStore for SqliteStore {
    async fn find_document_by_key(&self, key: &DocumentKey) -> StoreResult<Option<DocumentRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM documents WHERE doc_type = ?1 AND unit IS ?2 AND year IS ?3 \
                     ORDER BY id LIMIT 1",
                    DOCUMENT_COLUMNS
                ),
                params![key.doc_type, key.unit, key.year],
                document_from_row,
            )
            .optional()?;
        Ok(record)
    }

    async fn find_document_by_filename(
        &self,
        filename: &str,
    ) -> StoreResult<Option<DocumentRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM documents WHERE filename = ?1 ORDER BY id LIMIT 1",
                    DOCUMENT_COLUMNS
                ),
                params![filename],
                document_from_row,
            )
            .optional()?;
        Ok(record)
    }

    async fn insert_document(&self, meta: &DocumentMeta) -> StoreResult<DocumentRecord> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO documents (institution, doc_type, unit, year, filename, source_url) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                meta.institution,
                meta.doc_type,
                meta.unit,
                meta.year,
                meta.filename,
                meta.source_url
            ],
        )?;
        Ok(DocumentRecord::from_meta(conn.last_insert_rowid(), meta))
    }

    async fn mark_duplicate(&self, document_id: i64, original_id: i64) -> StoreResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE documents SET is_duplicate = 1, original_document_id = ?2 WHERE id = ?1",
            params![document_id, original_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                table: "documents",
                id: document_id,
            });
        }
        Ok(())
    }

    async fn list_questions(&self, document_id: i64) -> StoreResult<Vec<QuestionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, document_id, number, body FROM questions \
             WHERE document_id = ?1 ORDER BY number",
        )?;
        let rows = stmt
            .query_map(params![document_id], question_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn insert_questions(&self, rows: &[NewQuestion]) -> StoreResult<Vec<QuestionRecord>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut inserted = Vec::with_capacity(rows.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO questions (document_id, number, body) VALUES (?1, ?2, ?3)",
            )?;
            for row in rows {
                stmt.execute(params![row.document_id, row.number, row.body])?;
                inserted.push(QuestionRecord {
                    id: tx.last_insert_rowid(),
                    document_id: row.document_id,
                    number: row.number,
                    body: row.body.clone(),
                });
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    async fn update_question_body(&self, question_id: i64, body: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE questions SET body = ?2 WHERE id = ?1",
            params![question_id, body],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                table: "questions",
                id: question_id,
            });
        }
        Ok(())
    }

    async fn list_propositions(&self, document_id: i64) -> StoreResult<Vec<PropositionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT p.id, p.question_id, p.letter, p.text, p.is_correct \
             FROM propositions p JOIN questions q ON q.id = p.question_id \
             WHERE q.document_id = ?1 ORDER BY p.id",
        )?;
        let rows = stmt
            .query_map(params![document_id], proposition_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn insert_propositions(
        &self,
        rows: &[NewProposition],
    ) -> StoreResult<Vec<PropositionRecord>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut inserted = Vec::with_capacity(rows.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO propositions (question_id, letter, text, is_correct) \
                 VALUES (?1, ?2, ?3, 0)",
            )?;
            for row in rows {
                stmt.execute(params![row.question_id, row.letter.to_string(), row.text])?;
                inserted.push(PropositionRecord {
                    id: tx.last_insert_rowid(),
                    question_id: row.question_id,
                    letter: row.letter,
                    text: row.text.clone(),
                    is_correct: false,
                });
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    async fn set_correct(&self, proposition_id: i64, is_correct: bool) -> StoreResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE propositions SET is_correct = ?2 WHERE id = ?1",
            params![proposition_id, is_correct],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                table: "propositions",
                id: proposition_id,
            });
        }
        Ok(())
    }

    async fn delete_proposition(&self, proposition_id: i64) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM propositions WHERE id = ?1",
            params![proposition_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> DocumentMeta {
        DocumentMeta {
            institution: "Université".to_string(),
            unit: Some("UE3".to_string()),
            doc_type: "Concours Blanc N°1".to_string(),
            year: Some("2021 / 2022".to_string()),
            filename: "ue3-correction-cb1-s40-21-22.pdf".to_string(),
            source_url: "https://example.org/ue3-correction-cb1-s40-21-22.pdf".to_string(),
        }
    }

    #[tokio::test]
    async fn test_document_lookup_by_key_and_filename() {
        let store = SqliteStore::open_in_memory().unwrap();
        let inserted = store.insert_document(&meta()).await.unwrap();

        let by_key = store.find_document_by_key(&meta().key()).await.unwrap();
        assert_eq!(by_key.map(|d| d.id), Some(inserted.id));

        let by_name = store
            .find_document_by_filename("ue3-correction-cb1-s40-21-22.pdf")
            .await
            .unwrap();
        assert_eq!(by_name.map(|d| d.id), Some(inserted.id));
    }

    #[tokio::test]
    async fn test_null_unit_matches_null() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut m = meta();
        m.unit = None;
        let inserted = store.insert_document(&m).await.unwrap();

        let found = store.find_document_by_key(&m.key()).await.unwrap();
        assert_eq!(found.map(|d| d.id), Some(inserted.id));
        assert!(store.find_document_by_key(&meta().key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_proposition_unique_per_letter_rolls_back_chunk() {
        let store = SqliteStore::open_in_memory().unwrap();
        let doc = store.insert_document(&meta()).await.unwrap();
        let questions = store
            .insert_questions(&[NewQuestion {
                document_id: doc.id,
                number: 1,
                body: "Énoncé".to_string(),
            }])
            .await
            .unwrap();
        let qid = questions[0].id;

        let row = |letter, text: &str| NewProposition {
            question_id: qid,
            letter,
            text: text.to_string(),
        };
        let err = store
            .insert_propositions(&[row(Letter::A, "un"), row(Letter::A, "deux")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
        assert!(store.list_propositions(doc.id).await.unwrap().is_empty());

        store.insert_propositions(&[row(Letter::B, "trois")]).await.unwrap();
        let listed = store.list_propositions(doc.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].letter, Letter::B);
        assert!(!listed[0].is_correct);
    }

    #[tokio::test]
    async fn test_mark_duplicate_unknown_id() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store.mark_duplicate(42, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { table: "documents", id: 42 }));
    }
}
