//! 对账与写入 - 业务能力层
//!
//! 所有写入都先按自然键查重，重复运行同一份文档不会产生重复行。
//! 写入按固定大小分块，单块失败只影响该块；存储不可用时整体中止。

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::infrastructure::QuestionStore;
use crate::models::{
    DocumentMeta, DocumentRecord, Letter, LetterSet, NewProposition, NewQuestion,
    PropositionCandidate, PropositionRecord, QuestionRecord,
};

/// 文档对账结果
#[derive(Debug, Clone)]
pub struct DocumentOutcome {
    pub record: DocumentRecord,
    /// 复用了已有文档
    pub reused: bool,
}

/// 一次分块写入的统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriteSummary {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed_chunks: usize,
}

/// 选项清理结果
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub deleted: usize,
    /// 清理后字母集合不是 A–E 的题目
    pub incomplete: BTreeMap<u32, LetterSet>,
}

/// 非致命的存储错误只记录，存储不可用则向上返回
fn isolate(err: StoreError, what: &str) -> StoreResult<()> {
    match err {
        StoreError::Unavailable(_) => Err(err),
        other => {
            warn!("⚠️ {} 失败，跳过: {}", what, other);
            Ok(())
        }
    }
}

pub struct Reconciler<'a> {
    store: &'a dyn QuestionStore,
    chunk_size: usize,
    label: &'a str,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn QuestionStore, chunk_size: usize, label: &'a str) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
            label,
        }
    }

    /// 查找或创建文档
    ///
    /// 先按自然键查，再按文件名查。两者指向不同文档时，
    /// 把按文件名找到的那份标记为自然键那份的重复。
    pub async fn ensure_document(&self, meta: &DocumentMeta) -> StoreResult<DocumentOutcome> {
        let key = meta.key();
        let by_key = if key.is_complete() {
            self.store.find_document_by_key(&key).await?
        } else {
            None
        };
        let by_filename = self.store.find_document_by_filename(&meta.filename).await?;

        let record = match (by_key, by_filename) {
            (Some(original), Some(other)) if original.id != other.id => {
                if other.duplicate_of.is_none() {
                    warn!(
                        "[文档 {}] 文件名对应的文档 #{} 与自然键 {} 对应的文档 #{} 不同，标记为重复",
                        self.label, other.id, key, original.id
                    );
                    self.store.mark_duplicate(other.id, original.id).await?;
                }
                original
            }
            (Some(existing), _) | (None, Some(existing)) => existing,
            (None, None) => {
                let record = self.store.insert_document(meta).await?;
                info!("[文档 {}] 🆕 新建文档 #{} ({})", self.label, record.id, key);
                return Ok(DocumentOutcome {
                    record,
                    reused: false,
                });
            }
        };

        info!("[文档 {}] ♻️ 复用已有文档 #{} ({})", self.label, record.id, record.key);
        Ok(DocumentOutcome {
            record,
            reused: true,
        })
    }

    /// 写入题目，返回写入后该文档的全部题目（按题号）
    ///
    /// 已存在的题号只在新题干更长时更新。
    pub async fn persist_questions(
        &self,
        document_id: i64,
        questions: &BTreeMap<u32, String>,
    ) -> StoreResult<(BTreeMap<u32, QuestionRecord>, WriteSummary)> {
        let existing: BTreeMap<u32, QuestionRecord> = self
            .store
            .list_questions(document_id)
            .await?
            .into_iter()
            .map(|q| (q.number, q))
            .collect();

        let mut summary = WriteSummary::default();
        let mut pending = Vec::new();

        for (&number, body) in questions {
            match existing.get(&number) {
                Some(record) if body.chars().count() > record.body.chars().count() => {
                    match self.store.update_question_body(record.id, body).await {
                        Ok(()) => summary.updated += 1,
                        Err(err) => isolate(err, &format!("[文档 {}] Q{} 更新题干", self.label, number))?,
                    }
                }
                Some(_) => summary.skipped += 1,
                None => pending.push(NewQuestion {
                    document_id,
                    number,
                    body: body.clone(),
                }),
            }
        }

        for (i, chunk) in pending.chunks(self.chunk_size).enumerate() {
            match self.store.insert_questions(chunk).await {
                Ok(rows) => summary.inserted += rows.len(),
                Err(err) => {
                    summary.failed_chunks += 1;
                    isolate(err, &format!("[文档 {}] 题目写入块 {}", self.label, i + 1))?;
                }
            }
        }

        debug!("[文档 {}] 题目写入: {:?}", self.label, summary);
        let stored = self
            .store
            .list_questions(document_id)
            .await?
            .into_iter()
            .map(|q| (q.number, q))
            .collect();
        Ok((stored, summary))
    }

    /// 写入选项；(题目, 字母) 已存在或本次已写过的都跳过
    pub async fn persist_propositions(
        &self,
        document_id: i64,
        questions: &BTreeMap<u32, QuestionRecord>,
        candidates: &BTreeMap<u32, PropositionCandidate>,
    ) -> StoreResult<WriteSummary> {
        let mut seen: HashSet<(i64, Letter)> = self
            .store
            .list_propositions(document_id)
            .await?
            .into_iter()
            .map(|p| (p.question_id, p.letter))
            .collect();

        let mut summary = WriteSummary::default();
        let mut pending = Vec::new();

        for (number, candidate) in candidates {
            let Some(question) = questions.get(number) else {
                debug!("[文档 {}] Q{} 没有题目记录，选项不写入", self.label, number);
                continue;
            };
            for (&letter, text) in &candidate.options {
                if seen.insert((question.id, letter)) {
                    pending.push(NewProposition {
                        question_id: question.id,
                        letter,
                        text: text.clone(),
                    });
                } else {
                    summary.skipped += 1;
                }
            }
        }

        for (i, chunk) in pending.chunks(self.chunk_size).enumerate() {
            match self.store.insert_propositions(chunk).await {
                Ok(rows) => summary.inserted += rows.len(),
                Err(err) => {
                    summary.failed_chunks += 1;
                    isolate(err, &format!("[文档 {}] 选项写入块 {}", self.label, i + 1))?;
                }
            }
        }

        debug!("[文档 {}] 选项写入: {:?}", self.label, summary);
        Ok(summary)
    }

    /// 每题每个字母只保留最新插入的一条，并找出字母不全的题目
    pub async fn cleanup(
        &self,
        document_id: i64,
        questions: &BTreeMap<u32, QuestionRecord>,
    ) -> StoreResult<CleanupReport> {
        let number_of: BTreeMap<i64, u32> = questions.values().map(|q| (q.id, q.number)).collect();
        let mut grouped: BTreeMap<i64, BTreeMap<Letter, Vec<PropositionRecord>>> = BTreeMap::new();
        for row in self.store.list_propositions(document_id).await? {
            grouped
                .entry(row.question_id)
                .or_default()
                .entry(row.letter)
                .or_default()
                .push(row);
        }

        let mut report = CleanupReport::default();
        for (question_id, by_letter) in &grouped {
            for rows in by_letter.values() {
                let Some(keep) = rows.iter().map(|r| r.id).max() else {
                    continue;
                };
                for row in rows.iter().filter(|r| r.id != keep) {
                    match self.store.delete_proposition(row.id).await {
                        Ok(()) => report.deleted += 1,
                        Err(err) => isolate(err, &format!("删除重复选项 #{}", row.id))?,
                    }
                }
            }

            let letters: LetterSet = by_letter.keys().copied().collect();
            if letters.len() != Letter::ALL.len() {
                if let Some(&number) = number_of.get(question_id) {
                    report.incomplete.insert(number, letters);
                }
            }
        }

        // 完全没有选项的题目同样不完整
        for (number, question) in questions {
            if !grouped.contains_key(&question.id) {
                report.incomplete.insert(*number, LetterSet::new());
            }
        }

        if report.deleted > 0 {
            info!("[文档 {}] 🧹 删除了 {} 条重复选项", self.label, report.deleted);
        }
        for (number, letters) in &report.incomplete {
            warn!(
                "[文档 {}] Q{} ⚠️ 结构不完整，现有选项: {}",
                self.label, number, letters
            );
        }
        Ok(report)
    }

    /// 写入正确标记，只更新与目标不一致的行，返回更新行数
    pub async fn apply_answers(
        &self,
        document_id: i64,
        questions: &BTreeMap<u32, QuestionRecord>,
        answers: &BTreeMap<u32, LetterSet>,
    ) -> StoreResult<usize> {
        let answer_of: BTreeMap<i64, &LetterSet> = questions
            .values()
            .filter_map(|q| answers.get(&q.number).map(|set| (q.id, set)))
            .collect();

        let mut updated = 0;
        for row in self.store.list_propositions(document_id).await? {
            let Some(letters) = answer_of.get(&row.question_id) else {
                continue;
            };
            let wanted = letters.contains(row.letter);
            if row.is_correct == wanted {
                continue;
            }
            match self.store.set_correct(row.id, wanted).await {
                Ok(()) => updated += 1,
                Err(err) => isolate(err, &format!("更新选项 #{} 的正确标记", row.id))?,
            }
        }
        Ok(updated)
    }
}
