//! 服务调用封装
//!
//! 在补全服务外面加上重试、调用间隔和格式错误计数。
//! 重试用尽后返回 `None`，由调用点决定兜底方式。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::{ParseError, ServiceError};
use crate::infrastructure::{CompletionRequest, CompletionService};
use crate::utils::RetryPolicy;

pub struct ServiceCaller {
    completion: Arc<dyn CompletionService>,
    retry: RetryPolicy,
    inter_call_delay: Duration,
    malformed: AtomicUsize,
    calls: AtomicUsize,
}

impl ServiceCaller {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        retry: RetryPolicy,
        inter_call_delay: Duration,
    ) -> Self {
        Self {
            completion,
            retry,
            inter_call_delay,
            malformed: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// 发送请求；失败（含重试用尽）时记录警告并返回 `None`
    pub async fn ask(&self, label: &str, request: CompletionRequest) -> Option<String> {
        // 调用之间串行并留出间隔
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 && !self.inter_call_delay.is_zero() {
            tokio::time::sleep(self.inter_call_delay).await;
        }

        let result = self
            .retry
            .run(
                label,
                || self.completion.complete(request.clone()),
                ServiceError::is_retryable,
            )
            .await;

        match result {
            Ok(content) => Some(content),
            Err(err) => {
                warn!("⚠️ {} 调用失败，放弃: {}", label, err);
                None
            }
        }
    }

    /// 记录一次格式错误的响应
    pub fn note_malformed(&self, label: &str, err: &ParseError, raw: &str) {
        self.malformed.fetch_add(1, Ordering::SeqCst);
        warn!(
            "⚠️ {} 响应格式错误，已丢弃: {} | 内容: {}",
            label,
            err,
            crate::utils::truncate_text(raw, 120)
        );
    }

    pub fn malformed_count(&self) -> usize {
        self.malformed.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::ModelTier;
    use crate::testing::ScriptedCompletion;

    fn request(user: &str) -> CompletionRequest {
        CompletionRequest::text(ModelTier::Standard, user)
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let completion = Arc::new(
            ScriptedCompletion::new()
                .fail(ServiceError::RateLimited {
                    endpoint: "chat".to_string(),
                })
                .respond("ok"),
        );
        let caller = ServiceCaller::new(completion.clone(), RetryPolicy::immediate(3), Duration::ZERO);

        assert_eq!(caller.ask("test", request("bonjour")).await.as_deref(), Some("ok"));
        assert_eq!(completion.call_count(), 2);
        assert_eq!(caller.call_count(), 1);
    }

    #[tokio::test]
    async fn test_request_error_gives_up_at_once() {
        let completion = Arc::new(ScriptedCompletion::new().fail_when(
            "interdit",
            ServiceError::Request {
                endpoint: "chat".to_string(),
                message: "401".to_string(),
            },
        ));
        let caller = ServiceCaller::new(completion.clone(), RetryPolicy::immediate(3), Duration::ZERO);

        assert_eq!(caller.ask("test", request("accès interdit")).await, None);
        assert_eq!(completion.call_count(), 1);
    }
}
