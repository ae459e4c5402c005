//! 上游调用错误
//!
//! 错误类型在首次观察到 HTTP 状态码时确定，后续流程只看 `kind`。

use serde::{Deserialize, Serialize};

/// 上游错误体在日志中的最大字符数
const MAX_BODY_CHARS: usize = 200;

/// 上游错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamErrorKind {
    /// 429 限流，需要轮换身份
    RateLimited,
    /// 5xx 服务端错误，可重试
    ServerError,
    /// 其他非成功状态码
    ClientError,
    /// 网络、超时、响应体读取失败
    Transport,
}

impl UpstreamErrorKind {
    /// 根据 HTTP 状态码分类，成功状态返回 None
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            429 => Some(UpstreamErrorKind::RateLimited),
            500..=599 => Some(UpstreamErrorKind::ServerError),
            _ => Some(UpstreamErrorKind::ClientError),
        }
    }
}

/// 上游调用错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind:?} (status={status:?}): {message}")]
pub struct UpstreamError {
    pub kind: UpstreamErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl UpstreamError {
    pub fn new(kind: UpstreamErrorKind, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
        }
    }

    /// 从非成功响应构造
    pub fn from_http_status(status: u16, body: &str) -> Self {
        let kind = UpstreamErrorKind::from_status(status).unwrap_or(UpstreamErrorKind::ClientError);
        Self::new(kind, Some(status), safe_truncate(body, MAX_BODY_CHARS))
    }

    /// 网络层错误
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Transport, None, message)
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::from_http_status(status.as_u16(), &err.to_string()),
            None if err.is_timeout() => Self::transport(format!("请求超时: {err}")),
            None => Self::transport(err.to_string()),
        }
    }
}

/// 按字符截断，避免切断 UTF-8 多字节字符
pub fn safe_truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
