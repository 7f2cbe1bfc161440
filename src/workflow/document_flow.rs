//! 文档处理流程 - 流程层
//!
//! 核心职责：定义"一份文档"的完整处理流程
//!
//! 流程顺序：
//! 1. 获取源文档 → 转图 → 识别 → 质量检查
//! 2. 分页 → 元数据 → 文档对账
//! 3. 题目抽取 → 写入题目
//! 4. 选项抽取 → 写入选项 → 清理
//! 5. 答案判定 → 写入正确标记
//!
//! 每个阶段都在上一阶段的结果写入存储之后才开始。

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::FetchedSource;
use crate::models::{Letter, PageSection, QuestionRecord};
use crate::services::answer_resolver::{AnswerResolver, Evidence, QuestionView, Resolution};
use crate::services::{
    batch_planner, segmenter, MetadataExtractor, PropositionExtractor, QualityGate,
    QuestionExtractor, QuestionExtractorSettings, Reconciler, Transcriber, WarnKind,
};
use crate::utils::logging;
use crate::workflow::pipeline_ctx::PipelineCtx;
use crate::workflow::report::RunReport;

/// 识别得到的文档内容
struct Recognized {
    source: FetchedSource,
    sections: Vec<PageSection>,
    page_images: BTreeMap<usize, PathBuf>,
    retranscribed: Vec<usize>,
}

/// 文档处理流程
///
/// - 编排完整的文档处理流程
/// - 不持有任何客户端，全部来自 `PipelineCtx`
pub struct DocumentFlow<'a> {
    ctx: &'a PipelineCtx,
}

impl<'a> DocumentFlow<'a> {
    pub fn new(ctx: &'a PipelineCtx) -> Self {
        Self { ctx }
    }

    /// 处理一份文档
    ///
    /// 获取、识别失败或存储不可用时返回错误；其余问题都记入报告。
    pub async fn run(&self, source_url: &str) -> AppResult<RunReport> {
        let recognized = self.recognize(source_url).await?;
        self.process(recognized).await
    }

    /// 获取源文档并得到分页文本
    async fn recognize(&self, source_url: &str) -> AppResult<Recognized> {
        let config = &self.ctx.config;
        let source = self.ctx.fetcher.fetch(source_url).await?;
        let label = source.stem().to_string();
        logging::log_phase_start(&label, 1, "识别");

        let page_images = self.rasterize(&source).await;

        let pages = self
            .ctx
            .recognition
            .recognize_document(source_url)
            .await
            .map_err(|e| AppError::recognition(e.to_string()))?;
        if pages.iter().all(|p| p.trim().is_empty()) {
            return Err(AppError::recognition(format!("{} 没有识别出任何文本", source.filename)));
        }
        info!("[文档 {}] 识别完成，共 {} 页", label, pages.len());

        let gate = QualityGate::new(config.min_page_chars, config.expected_marker_pages.iter().copied());
        let transcription = Transcriber::new(&self.ctx.caller, gate, &label)
            .review(pages, &page_images)
            .await;

        let markdown = segmenter::join_pages(&transcription.pages);
        self.save_markdown(&source, &markdown).await;

        let segmentation = segmenter::segment(&markdown, config.page_overlap_chars);
        if segmentation.sections.is_empty() {
            return Err(AppError::recognition(format!("{} 分页后没有内容", source.filename)));
        }

        Ok(Recognized {
            source,
            sections: segmentation.sections,
            page_images,
            retranscribed: transcription.replaced,
        })
    }

    /// 转图失败只会关闭读图相关的功能
    async fn rasterize(&self, source: &FetchedSource) -> BTreeMap<usize, PathBuf> {
        let out_dir = PathBuf::from(&self.ctx.config.work_dir)
            .join(source.stem())
            .join("pages");
        match self.ctx.rasterizer.rasterize(&source.local_path, &out_dir).await {
            Ok(paths) => paths
                .into_iter()
                .enumerate()
                .map(|(i, path)| (i + 1, path))
                .collect(),
            Err(err) => {
                warn!("[文档 {}] ⚠️ 转图失败，读图功能不可用: {}", source.stem(), err);
                BTreeMap::new()
            }
        }
    }

    async fn save_markdown(&self, source: &FetchedSource, markdown: &str) {
        let dir = PathBuf::from(&self.ctx.config.work_dir).join(source.stem());
        let path = dir.join("content.md");
        let result = async {
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(&path, markdown).await
        }
        .await;
        if let Err(err) = result {
            warn!("[文档 {}] 保存识别文本 {} 失败: {}", source.stem(), path.display(), err);
        }
    }

    async fn process(&self, recognized: Recognized) -> AppResult<RunReport> {
        let config = &self.ctx.config;
        let caller = &self.ctx.caller;
        let malformed_before = caller.malformed_count();
        let Recognized {
            source,
            sections,
            page_images,
            retranscribed,
        } = recognized;

        // ========== 阶段 2: 元数据与文档 ==========
        let full_text = sections.iter().map(|s| s.own_text()).collect::<Vec<_>>().join("\n\n");
        let meta = MetadataExtractor::new(caller)
            .extract(&source, &full_text, &config.institution)
            .await;
        let label = meta.label();
        logging::log_phase_start(&label, 2, "文档对账");

        let reconciler = Reconciler::new(self.ctx.store.as_ref(), config.write_chunk_size, &label);
        let document = reconciler.ensure_document(&meta).await?;
        let document_id = document.record.id;

        let mut report = RunReport::new(label.clone());
        report.document_id = Some(document_id);
        report.document_reused = document.reused;
        report.retranscribed_pages = retranscribed;

        // 文档已经存在：之后的失败都要留下记录
        let mut phase = "题目抽取";
        let filled = self
            .populate(&reconciler, &sections, page_images, &mut report, &mut phase)
            .await;
        self.finish_malformed(&mut report, malformed_before).await;

        match filled {
            Ok(()) => Ok(report),
            Err(err) => {
                let detail = format!("文档 #{} 在{}阶段中断: {}", document_id, phase, err);
                self.warn(&label, None, WarnKind::Interrupted, &detail).await;
                Err(AppError::Interrupted {
                    document_id,
                    label,
                    phase,
                    source: Box::new(err),
                })
            }
        }
    }

    /// 阶段 3–5：题目、选项、答案
    ///
    /// `phase` 始终指向正在执行的阶段。
    async fn populate(
        &self,
        reconciler: &Reconciler<'_>,
        sections: &[PageSection],
        page_images: BTreeMap<usize, PathBuf>,
        report: &mut RunReport,
        phase: &mut &'static str,
    ) -> AppResult<()> {
        let config = &self.ctx.config;
        let caller = &self.ctx.caller;
        let label = report.label.clone();
        let Some(document_id) = report.document_id else {
            return Ok(());
        };

        // ========== 阶段 3: 题目 ==========
        self.pause().await;
        logging::log_phase_start(&label, 3, "题目抽取");
        let batches = batch_planner::plan_batches(sections, config.batch_char_budget);
        let settings = QuestionExtractorSettings {
            whole_document_char_limit: config.whole_document_char_limit,
            whole_document_max_sections: config.whole_document_max_sections,
        };
        let extraction = QuestionExtractor::new(caller, settings, &label)
            .extract(sections, &batches)
            .await;

        for number in &extraction.gaps {
            self.warn(&label, Some(*number), WarnKind::Gap, "题号范围内缺失，未补全").await;
        }
        report.gaps = extraction.gaps.clone();

        // 服务报告的缺号：只保留最终确实没有抽到、且没有被区间检查报告过的
        report.reported_gaps = extraction
            .suspected_gaps
            .iter()
            .copied()
            .filter(|n| !extraction.questions.contains_key(n))
            .collect();
        for number in report.reported_gaps.difference(&extraction.gaps) {
            self.warn(&label, Some(*number), WarnKind::Gap, "补全服务报告缺号，未补全").await;
        }

        *phase = "题目写入";
        let (questions, summary) = reconciler
            .persist_questions(document_id, &extraction.questions)
            .await?;
        report.questions_inserted = summary.inserted;
        report.questions_updated = summary.updated;
        report.question_count = questions.len();

        if questions.is_empty() {
            warn!("[文档 {}] ⚠️ 没有任何题目，跳过后续阶段", label);
            return Ok(());
        }

        // ========== 阶段 4: 选项 ==========
        *phase = "选项抽取";
        self.pause().await;
        logging::log_phase_start(&label, 4, "选项抽取");
        let known: BTreeSet<u32> = questions.keys().copied().collect();
        let propositions = PropositionExtractor::new(caller, &label)
            .extract(&batches, sections, &known)
            .await;

        *phase = "选项写入";
        let summary = reconciler
            .persist_propositions(document_id, &questions, &propositions.by_number)
            .await?;
        report.propositions_inserted = summary.inserted;

        *phase = "选项清理";
        let cleanup = reconciler.cleanup(document_id, &questions).await?;
        report.duplicates_deleted = cleanup.deleted;
        for (number, letters) in &cleanup.incomplete {
            self.warn(
                &label,
                Some(*number),
                WarnKind::Incomplete,
                &format!("现有选项 {}", letters),
            )
            .await;
        }
        report.structural_warnings = cleanup.incomplete;

        // ========== 阶段 5: 答案 ==========
        *phase = "答案判定";
        self.pause().await;
        logging::log_phase_start(&label, 5, "答案判定");
        let views = self.question_views(document_id, &questions).await?;
        let evidence = Evidence::build(sections, page_images);
        let trails = AnswerResolver::standard(caller, &label, config.vision_fallback)
            .resolve(&views, &evidence)
            .await;
        report.record_resolutions(&trails);

        for (number, state) in &report.outcomes {
            match state {
                Resolution::Ambiguous { reason } => {
                    self.warn(&label, Some(*number), WarnKind::Ambiguous, reason).await;
                }
                Resolution::Unresolved => {
                    self.warn(&label, Some(*number), WarnKind::Unresolved, "所有检测器均无结论")
                        .await;
                }
                Resolution::Resolved { .. } => {}
            }
        }

        *phase = "正确标记写入";
        report.correct_flags_updated = reconciler
            .apply_answers(document_id, &questions, &report.resolved_answers())
            .await?;
        info!(
            "[文档 {}] ✅ 更新了 {} 条正确标记",
            label, report.correct_flags_updated
        );
        Ok(())
    }

    /// 以存储中的题目和选项为准构建判定输入
    async fn question_views(
        &self,
        document_id: i64,
        questions: &BTreeMap<u32, QuestionRecord>,
    ) -> AppResult<Vec<QuestionView>> {
        let mut by_question: BTreeMap<i64, BTreeMap<Letter, String>> = BTreeMap::new();
        for row in self.ctx.store.list_propositions(document_id).await? {
            by_question.entry(row.question_id).or_default().insert(row.letter, row.text);
        }
        Ok(questions
            .values()
            .map(|q| QuestionView {
                number: q.number,
                body: q.body.clone(),
                propositions: by_question.remove(&q.id).unwrap_or_default(),
            })
            .collect())
    }

    async fn finish_malformed(&self, report: &mut RunReport, before: usize) {
        report.malformed_responses = self.ctx.caller.malformed_count().saturating_sub(before);
        if report.malformed_responses > 0 {
            let detail = format!("{} 次响应被丢弃", report.malformed_responses);
            let label = report.label.clone();
            self.warn(&label, None, WarnKind::Malformed, &detail).await;
        }
    }

    /// 阶段之间的停顿
    async fn pause(&self) {
        let pause = self.ctx.config.phase_pause();
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }

    /// 记录警告并写入警告文件
    async fn warn(&self, label: &str, question: Option<u32>, kind: WarnKind, detail: &str) {
        match question {
            Some(n) => warn!("[文档 {}] Q{} ⚠️ {}: {}", label, n, kind, detail),
            None => warn!("[文档 {}] ⚠️ {}: {}", label, kind, detail),
        }
        if let Err(err) = self.ctx.warn_writer.write(label, question, kind, detail).await {
            warn!("写入警告文件失败: {:#}", err);
        }
    }
}
