//! 测试替身
//!
//! 不访问网络的补全、识别、下载和转图实现，供单元测试和 tests/ 使用。

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{FetchError, ServiceError};
use crate::infrastructure::{
    CompletionRequest, CompletionService, FetchedSource, PageRasterizer, RecognitionService,
    SourceFetcher,
};

/// 按脚本回复的补全服务
///
/// 先按 `respond_when` 规则匹配用户消息，匹配不上再依次弹出 `respond` 队列；
/// 都没有时返回不可重试的错误。
#[derive(Default)]
pub struct ScriptedCompletion {
    rules: Vec<(String, Result<String, ServiceError>)>,
    queue: Mutex<VecDeque<Result<String, ServiceError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    /// 用户消息包含 `needle` 时回复 `reply`（可重复命中）
    pub fn respond_when(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Ok(reply.into())));
        self
    }

    /// 用户消息包含 `needle` 时返回错误
    pub fn fail_when(mut self, needle: impl Into<String>, err: ServiceError) -> Self {
        self.rules.push((needle.into(), Err(err)));
        self
    }

    /// 追加一条按顺序使用的回复
    pub fn respond(self, reply: impl Into<String>) -> Self {
        self.push(Ok(reply.into()))
    }

    /// 追加一条按顺序使用的错误
    pub fn fail(self, err: ServiceError) -> Self {
        self.push(Err(err))
    }

    fn push(self, item: Result<String, ServiceError>) -> Self {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(item);
        }
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// 已收到的请求
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ServiceError> {
        let user = request.user.clone();
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        if let Some((_, reply)) = self.rules.iter().find(|(needle, _)| user.contains(needle.as_str())) {
            return reply.clone();
        }
        let queued = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        queued.unwrap_or_else(|| {
            Err(ServiceError::Request {
                endpoint: "scripted".to_string(),
                message: "没有预设回复".to_string(),
            })
        })
    }
}

/// 返回固定页面的识别服务
pub struct StaticRecognition {
    pages: Vec<String>,
}

impl StaticRecognition {
    pub fn new<S: Into<String>>(pages: impl IntoIterator<Item = S>) -> Self {
        Self {
            pages: pages.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl RecognitionService for StaticRecognition {
    async fn recognize_document(&self, _document_url: &str) -> Result<Vec<String>, ServiceError> {
        Ok(self.pages.clone())
    }
}

/// 不下载，直接返回 URL 对应的文件名
pub struct StaticFetcher;

#[async_trait]
impl SourceFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedSource, FetchError> {
        let filename = crate::infrastructure::source::filename_from_url(url)?;
        Ok(FetchedSource {
            url: url.to_string(),
            local_path: PathBuf::from(&filename),
            filename,
        })
    }
}

/// 不产出任何页面图片
pub struct NoRasterizer;

#[async_trait]
impl PageRasterizer for NoRasterizer {
    async fn rasterize(&self, _document: &Path, _out_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}
