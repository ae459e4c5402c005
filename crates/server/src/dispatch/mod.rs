//! 派发循环
//!
//! 一次用户消息的完整处理：从身份池取身份 → 调用上游 → 按错误类型
//! 退避重试或轮换身份，直到成功或用尽尝试次数。
//!
//! 流程建模为显式状态机：
//!
//! ```text
//! SelectIdentity ──> Attempt ──> Success
//!       ^               │
//!       │               ├──> BackoffRateLimited ──┐
//!       │               └──> BackoffServerError ──┤
//!       └─────────────────────────────────────────┘
//! 任意状态 ──> Exhausted（池耗尽 / 次数用尽 / 取消）
//! ```

mod sleeper;

pub use sleeper::{Sleeper, TokioSleeper};

use chatrelay_core::config::DispatchConfig;
use chatrelay_core::{Identity, IdentityPool, Selection};
use chatrelay_providers::{
    clean_reply, is_plausible_reply, ChatUpstream, UpstreamError, UpstreamErrorKind,
    UpstreamRequest,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 所有身份都在冷却中
pub const POOL_EXHAUSTED_REPLY: &str = "All identities are currently rate limited. Please wait about an hour for the system to recover automatically, or try again later.";

/// 上游持续报错
pub const HIGH_DEMAND_REPLY: &str = "The system is currently experiencing high demand. I'm automatically switching between available resources. Please try again in a few seconds.";

/// 网络故障等其他失败
pub const GENERIC_FAILURE_REPLY: &str =
    "I'm sorry, I'm having trouble processing your request right now. Please try again in a moment.";

/// 上游回复为空或过短
pub const UNPROCESSABLE_REPLY: &str = "I'm sorry, I couldn't process your request properly. Could you please try rephrasing your question?";

/// 重试策略
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub rate_limit_backoff: Duration,
    pub server_error_backoff: Duration,
    pub attempt_timeout: Duration,
    pub min_reply_chars: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&DispatchConfig::default())
    }
}

impl From<&DispatchConfig> for RetryPolicy {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            rate_limit_backoff: Duration::from_millis(config.rate_limit_backoff_ms),
            server_error_backoff: Duration::from_millis(config.server_error_backoff_ms),
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
            min_reply_chars: config.min_reply_chars,
        }
    }
}

/// 派发请求
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    pub message: String,
    pub message_id: String,
    pub web_search: bool,
}

/// 派发成功结果
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub reply_text: String,
    pub identity_key: String,
}

/// 派发失败
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    /// 所有身份都在冷却中
    #[error("所有身份都在冷却中")]
    PoolExhausted,
    /// 身份池为空（配置错误）
    #[error("身份池为空")]
    EmptyPool,
    /// 尝试次数用尽
    ///
    /// `last` 是最近一次非限流错误；全部为限流时是最后一次限流错误。
    #[error("{attempts} 次尝试全部失败，最后错误: {last:?}")]
    AttemptsExhausted {
        attempts: u32,
        last: Option<UpstreamError>,
    },
    /// 调用方取消
    #[error("派发已取消")]
    Cancelled,
}

impl DispatchError {
    /// 转换为可展示给用户的文本，不包含任何上游细节
    pub fn user_message(&self) -> &'static str {
        match self {
            DispatchError::PoolExhausted => POOL_EXHAUSTED_REPLY,
            DispatchError::EmptyPool => HIGH_DEMAND_REPLY,
            DispatchError::AttemptsExhausted {
                last: Some(err), ..
            } if err.kind == UpstreamErrorKind::Transport => GENERIC_FAILURE_REPLY,
            DispatchError::AttemptsExhausted { .. } => HIGH_DEMAND_REPLY,
            DispatchError::Cancelled => GENERIC_FAILURE_REPLY,
        }
    }
}

/// 状态机状态
#[derive(Debug)]
enum DispatchState {
    SelectIdentity,
    Attempt(Identity),
    BackoffRateLimited,
    BackoffServerError,
    Success(DispatchOutcome),
    Exhausted(DispatchError),
}

/// 派发器
pub struct Dispatcher {
    pool: Arc<IdentityPool>,
    upstream: Arc<dyn ChatUpstream>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<IdentityPool>,
        upstream: Arc<dyn ChatUpstream>,
        policy: RetryPolicy,
    ) -> Self {
        Self::with_sleeper(pool, upstream, policy, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(
        pool: Arc<IdentityPool>,
        upstream: Arc<dyn ChatUpstream>,
        policy: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            pool,
            upstream,
            sleeper,
            policy,
        }
    }

    pub fn pool(&self) -> &Arc<IdentityPool> {
        &self.pool
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 派发一条消息（不可取消）
    pub async fn dispatch(
        &self,
        request: &DispatchRequest,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.dispatch_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// 派发一条消息，取消令牌会中断进行中的调用和退避等待
    pub async fn dispatch_with_cancel(
        &self,
        request: &DispatchRequest,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, DispatchError> {
        if self.pool.is_empty() {
            tracing::error!("[DISPATCH] 身份池为空，请检查配置");
            return Err(DispatchError::EmptyPool);
        }

        let available = self.pool.available_count();
        if available == 0 {
            tracing::warn!("[DISPATCH] 没有可用身份，所有身份都在冷却中");
            return Err(DispatchError::PoolExhausted);
        }
        tracing::info!("[DISPATCH] 开始派发，可用身份数: {}", available);

        let upstream_request = UpstreamRequest {
            message: request.message.clone(),
            message_id: request.message_id.clone(),
            web_search: request.web_search,
        };

        let mut attempts = 0u32;
        let mut last_error: Option<UpstreamError> = None;
        let mut state = DispatchState::SelectIdentity;

        loop {
            state = match state {
                DispatchState::Success(outcome) => return Ok(outcome),
                DispatchState::Exhausted(err) => return Err(err),
                _ if cancel.is_cancelled() => DispatchState::Exhausted(DispatchError::Cancelled),

                DispatchState::SelectIdentity => {
                    if attempts >= self.policy.max_attempts {
                        tracing::warn!(
                            "[DISPATCH] {} 次尝试全部失败，剩余可用身份: {}",
                            attempts,
                            self.pool.available_count()
                        );
                        DispatchState::Exhausted(DispatchError::AttemptsExhausted {
                            attempts,
                            last: last_error.take(),
                        })
                    } else {
                        self.select_identity()
                    }
                }

                DispatchState::Attempt(identity) => {
                    attempts += 1;
                    tracing::info!(
                        "[DISPATCH] 第 {}/{} 次尝试，身份: {} (请求 #{})",
                        attempts,
                        self.policy.max_attempts,
                        identity.key,
                        identity.request_count
                    );

                    let result = tokio::select! {
                        result = self.attempt(&identity, &upstream_request) => Some(result),
                        _ = cancel.cancelled() => None,
                    };

                    match result {
                        None => DispatchState::Exhausted(DispatchError::Cancelled),
                        Some(Ok(body)) => {
                            DispatchState::Success(self.finish(body, request.web_search, identity))
                        }
                        Some(Err(err)) => {
                            tracing::warn!(
                                "[DISPATCH] 身份 {} 请求失败: {}",
                                identity.key,
                                err
                            );
                            let next = match err.kind {
                                UpstreamErrorKind::RateLimited => {
                                    self.pool.mark_exhausted(&identity.key);
                                    DispatchState::BackoffRateLimited
                                }
                                UpstreamErrorKind::ServerError
                                | UpstreamErrorKind::ClientError
                                | UpstreamErrorKind::Transport => {
                                    DispatchState::BackoffServerError
                                }
                            };
                            // 限流错误只在此前全是限流时才记为最后错误
                            let keep_previous = err.kind == UpstreamErrorKind::RateLimited
                                && last_error
                                    .as_ref()
                                    .is_some_and(|prev| prev.kind != UpstreamErrorKind::RateLimited);
                            if !keep_previous {
                                last_error = Some(err);
                            }
                            next
                        }
                    }
                }

                DispatchState::BackoffRateLimited => {
                    self.backoff(self.policy.rate_limit_backoff, attempts, cancel)
                        .await
                }

                DispatchState::BackoffServerError => {
                    self.backoff(self.policy.server_error_backoff, attempts, cancel)
                        .await
                }
            };
        }
    }

    fn select_identity(&self) -> DispatchState {
        match self.pool.select_next() {
            Ok(Selection::Ready(identity)) => DispatchState::Attempt(identity),
            Ok(Selection::Fallback(identity)) => {
                tracing::warn!(
                    "[DISPATCH] 轮换过程中身份池耗尽，最早恢复的身份: {}",
                    identity.key
                );
                DispatchState::Exhausted(DispatchError::PoolExhausted)
            }
            Err(_) => DispatchState::Exhausted(DispatchError::EmptyPool),
        }
    }

    async fn attempt(
        &self,
        identity: &Identity,
        request: &UpstreamRequest,
    ) -> Result<String, UpstreamError> {
        match tokio::time::timeout(
            self.policy.attempt_timeout,
            self.upstream.send(identity, request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::transport(format!(
                "请求超时 ({}ms)",
                self.policy.attempt_timeout.as_millis()
            ))),
        }
    }

    fn finish(&self, body: String, web_search: bool, identity: Identity) -> DispatchOutcome {
        let cleaned = clean_reply(&body, web_search);
        let reply_text = if is_plausible_reply(&cleaned, self.policy.min_reply_chars) {
            cleaned
        } else {
            tracing::warn!(
                "[DISPATCH] 上游回复过短 ({} 字符)，使用默认提示",
                cleaned.chars().count()
            );
            UNPROCESSABLE_REPLY.to_string()
        };

        tracing::info!("[DISPATCH] 请求成功，身份: {}", identity.key);
        DispatchOutcome {
            reply_text,
            identity_key: identity.key,
        }
    }

    /// 退避等待；最后一次尝试之后不再等待
    async fn backoff(
        &self,
        delay: Duration,
        attempts: u32,
        cancel: &CancellationToken,
    ) -> DispatchState {
        if attempts >= self.policy.max_attempts {
            return DispatchState::SelectIdentity;
        }

        tokio::select! {
            _ = self.sleeper.sleep(delay) => DispatchState::SelectIdentity,
            _ = cancel.cancelled() => DispatchState::Exhausted(DispatchError::Cancelled),
        }
    }
}
