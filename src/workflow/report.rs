//! 单个文档的运行报告

use std::collections::{BTreeMap, BTreeSet};

use crate::models::LetterSet;
use crate::services::answer_resolver::{DetectorKind, Resolution, ResolutionTrail};

/// 单个文档的运行报告
#[derive(Debug, Default)]
pub struct RunReport {
    /// 文档标签（文件名去掉扩展名）
    pub label: String,
    /// 已持久化的文档 id；为 None 表示文档没有写入
    pub document_id: Option<i64>,
    pub document_reused: bool,
    /// 被重新转写的页
    pub retranscribed_pages: Vec<usize>,
    /// 该文档当前的题目总数
    pub question_count: usize,
    pub questions_inserted: usize,
    pub questions_updated: usize,
    pub propositions_inserted: usize,
    pub duplicates_deleted: usize,
    pub correct_flags_updated: usize,
    /// 每道题的最终判定
    pub outcomes: BTreeMap<u32, Resolution>,
    pub gaps: BTreeSet<u32>,
    /// 补全服务自己报告、且最终没有抽到的题号
    pub reported_gaps: BTreeSet<u32>,
    /// 选项字母集合不是 A–E 的题目
    pub structural_warnings: BTreeMap<u32, LetterSet>,
    pub malformed_responses: usize,
    /// 每个检测器确定的题数
    pub detector_histogram: BTreeMap<DetectorKind, usize>,
    /// 文档写入后中断的阶段
    pub interrupted_phase: Option<String>,
}

impl RunReport {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    /// 记录答案判定结果
    pub fn record_resolutions(&mut self, trails: &BTreeMap<u32, ResolutionTrail>) {
        for (number, trail) in trails {
            if let Resolution::Resolved { detector, .. } = &trail.state {
                *self.detector_histogram.entry(*detector).or_default() += 1;
            }
            self.outcomes.insert(*number, trail.state.clone());
        }
    }

    /// 已确定答案的题目及其正确字母
    pub fn resolved_answers(&self) -> BTreeMap<u32, LetterSet> {
        self.outcomes
            .iter()
            .filter_map(|(n, state)| state.letters().map(|l| (*n, l.clone())))
            .collect()
    }

    pub fn resolved_count(&self) -> usize {
        self.outcomes.values().filter(|s| s.is_resolved()).count()
    }

    pub fn ambiguous_count(&self) -> usize {
        self.outcomes
            .values()
            .filter(|s| matches!(s, Resolution::Ambiguous { .. }))
            .count()
    }

    pub fn unresolved_count(&self) -> usize {
        self.outcomes
            .values()
            .filter(|s| matches!(s, Resolution::Unresolved))
            .count()
    }

    /// 至少写入了文档本身
    pub fn is_persisted(&self) -> bool {
        self.document_id.is_some()
    }
}
