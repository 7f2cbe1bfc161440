//! 通用重试策略
//!
//! 每个服务调用点共用同一套"最多 N 次 + 指数退避"的逻辑，
//! 由调用方传入可重试判定。

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// 重试策略
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 最大尝试次数（含第一次）
    pub max_attempts: usize,
    /// 第一次重试前的等待时间
    pub initial_delay: Duration,
    /// 每次重试后等待时间的倍数
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2), 2.0)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, initial_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            backoff_factor: if backoff_factor < 1.0 { 1.0 } else { backoff_factor },
        }
    }

    /// 不等待的策略，测试用
    pub fn immediate(max_attempts: usize) -> Self {
        Self::new(max_attempts, Duration::ZERO, 1.0)
    }

    /// 第 `attempt` 次失败之后的等待时间（attempt 从 1 开始）
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        self.initial_delay
            .mul_f64(self.backoff_factor.powi(exponent))
    }

    /// 执行操作，遇到可重试错误时按退避间隔重试
    ///
    /// 不可重试的错误立即返回；重试次数用完后返回最后一次错误。
    pub async fn run<T, E, F, Fut, P>(&self, label: &str, mut operation: F, retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && retryable(&err) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        "{} 调用失败 (第 {}/{} 次): {}，{:?} 后重试",
                        label, attempt, self.max_attempts, err, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    debug!("{} 放弃重试 (第 {} 次): {}", label, attempt, err);
                    return Err(err);
                }
            }
        }
    }
}
