//! 身份相关类型定义
//!
//! 定义身份记录、选择结果、统计快照等核心类型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 身份 - 一组预置的会话凭证
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// 唯一标识（通常是邮箱形式的字符串）
    pub key: String,
    /// 上游分配的主体 ID，首次使用后由外部服务写入
    pub secondary_id: Option<String>,
    /// 每次请求携带的校验串
    #[serde(skip_serializing)]
    pub credential_token: String,
    /// 最后使用时间
    pub last_used_at: Option<DateTime<Utc>>,
    /// 自上次重置/恢复以来的请求次数
    pub request_count: u64,
    /// 是否处于限流冷却中
    pub exhausted: bool,
    /// 冷却结束时间（仅在 exhausted 为 true 时有意义）
    pub exhausted_until: Option<DateTime<Utc>>,
}

impl Identity {
    /// 创建新身份
    pub fn new(key: impl Into<String>, credential_token: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secondary_id: None,
            credential_token: credential_token.into(),
            last_used_at: None,
            request_count: 0,
            exhausted: false,
            exhausted_until: None,
        }
    }

    /// 设置上游主体 ID
    pub fn with_secondary_id(mut self, secondary_id: Option<String>) -> Self {
        self.secondary_id = secondary_id;
        self
    }

    /// 在给定时刻是否可被选中（未冷却，或冷却已到期）
    pub fn is_selectable_at(&self, now: DateTime<Utc>) -> bool {
        !self.exhausted || self.cooldown_elapsed(now)
    }

    fn cooldown_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.exhausted_until.map(|until| now >= until).unwrap_or(true)
    }

    /// 冷却到期则恢复为可用，返回是否发生了恢复
    pub(crate) fn recover_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.exhausted && self.cooldown_elapsed(now) {
            self.exhausted = false;
            self.request_count = 0;
            true
        } else {
            false
        }
    }

    /// 记录一次派发
    pub(crate) fn mark_used(&mut self, now: DateTime<Utc>) {
        self.last_used_at = Some(now);
        self.request_count += 1;
    }

    /// 强制恢复为初始可用状态
    pub(crate) fn reset(&mut self) {
        self.request_count = 0;
        self.last_used_at = None;
        self.exhausted = false;
        self.exhausted_until = None;
    }

    /// 生成统计快照
    pub fn stats_at(&self, now: DateTime<Utc>) -> IdentityStats {
        let available_in_ms = match (self.exhausted, self.exhausted_until) {
            (true, Some(until)) => (until - now).num_milliseconds().max(0) as u64,
            _ => 0,
        };

        IdentityStats {
            key: self.key.clone(),
            request_count: self.request_count,
            last_used_at: self.last_used_at,
            exhausted: self.exhausted,
            available_in_ms,
            available: self.is_selectable_at(now),
        }
    }
}

/// `select_next` 的结果
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// 正常轮询命中，身份已被标记使用
    Ready(Identity),
    /// 全部身份都在冷却中，返回最早恢复的那个（未修改任何状态）
    Fallback(Identity),
}

impl Selection {
    pub fn identity(&self) -> &Identity {
        match self {
            Selection::Ready(identity) | Selection::Fallback(identity) => identity,
        }
    }

    pub fn into_identity(self) -> Identity {
        match self {
            Selection::Ready(identity) | Selection::Fallback(identity) => identity,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Selection::Fallback(_))
    }
}

/// 单个身份的统计快照
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IdentityStats {
    pub key: String,
    pub request_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub exhausted: bool,
    /// 距离恢复的毫秒数，可用时为 0
    pub available_in_ms: u64,
    pub available: bool,
}
