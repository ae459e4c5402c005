//! 身份池实现
//!
//! 固定成员的身份集合 + 轮询游标，使用单把互斥锁保护。
//! 所有操作都在锁内同步完成，不会跨越 `.await`。

use super::types::{Identity, IdentityStats, Selection};
use crate::clock::{Clock, SystemClock};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// 默认冷却时间：1 小时
pub const DEFAULT_COOLDOWN_SECS: i64 = 60 * 60;

/// 身份池错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PoolError {
    /// 身份池为空（配置错误）
    #[error("身份池为空")]
    EmptyPool,
    /// 身份 key 重复
    #[error("身份已存在: {0}")]
    DuplicateKey(String),
}

/// 身份池状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolStatus {
    /// 总身份数
    pub total: usize,
    /// 下一次选择时可用的身份数
    pub available: usize,
    /// 冷却中的身份数
    pub exhausted: usize,
}

struct PoolInner {
    identities: Vec<Identity>,
    cursor: usize,
}

/// 身份池 - 轮询分发身份，追踪限流冷却
pub struct IdentityPool {
    inner: Mutex<PoolInner>,
    cooldown: Duration,
    clock: Arc<dyn Clock>,
}

impl IdentityPool {
    /// 使用系统时钟和默认冷却时间创建
    pub fn new(identities: Vec<Identity>) -> Result<Self, PoolError> {
        Self::with_clock(
            identities,
            Duration::seconds(DEFAULT_COOLDOWN_SECS),
            Arc::new(SystemClock),
        )
    }

    /// 指定冷却时间和时钟创建
    ///
    /// # 错误
    /// - 如果存在重复的 key，返回 `PoolError::DuplicateKey`
    pub fn with_clock(
        identities: Vec<Identity>,
        cooldown: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PoolError> {
        let mut seen = HashSet::new();
        for identity in &identities {
            if !seen.insert(identity.key.as_str()) {
                return Err(PoolError::DuplicateKey(identity.key.clone()));
            }
        }

        Ok(Self {
            inner: Mutex::new(PoolInner {
                identities,
                cursor: 0,
            }),
            cooldown,
            clock,
        })
    }

    pub fn len(&self) -> usize {
        self.inner.lock().identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().identities.is_empty()
    }

    /// 按轮询顺序返回所有 key
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .lock()
            .identities
            .iter()
            .map(|identity| identity.key.clone())
            .collect()
    }

    /// 获取身份快照（只读）
    pub fn get(&self, key: &str) -> Option<Identity> {
        self.inner
            .lock()
            .identities
            .iter()
            .find(|identity| identity.key == key)
            .cloned()
    }

    /// 选择下一个可用身份（轮询策略）
    ///
    /// 1. 先惰性恢复所有冷却已到期的身份
    /// 2. 从游标处循环查找第一个可用身份，标记使用并推进游标
    /// 3. 全部冷却中时返回最早恢复的身份，不修改任何状态
    ///
    /// # 错误
    /// - 如果池为空，返回 `PoolError::EmptyPool`
    pub fn select_next(&self) -> Result<Selection, PoolError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let len = inner.identities.len();
        if len == 0 {
            return Err(PoolError::EmptyPool);
        }

        for identity in inner.identities.iter_mut() {
            if identity.recover_if_due(now) {
                tracing::info!("[POOL] 身份 {} 冷却结束，已恢复", identity.key);
            }
        }

        let start = inner.cursor;
        for offset in 0..len {
            let index = (start + offset) % len;
            if inner.identities[index].exhausted {
                continue;
            }

            inner.cursor = (index + 1) % len;
            let identity = &mut inner.identities[index];
            identity.mark_used(now);
            tracing::debug!(
                "[POOL] 使用身份: {} (请求 #{})",
                identity.key,
                identity.request_count
            );
            return Ok(Selection::Ready(identity.clone()));
        }

        let soonest = inner
            .identities
            .iter()
            .min_by_key(|identity| identity.exhausted_until)
            .cloned()
            .ok_or(PoolError::EmptyPool)?;
        tracing::warn!(
            "[POOL] 所有身份都在冷却中，最早恢复的是: {}",
            soonest.key
        );
        Ok(Selection::Fallback(soonest))
    }

    /// 标记身份为限流冷却
    ///
    /// 重复调用会从当前时间重新计算冷却。未知 key 返回 false。
    pub fn mark_exhausted(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        match inner.identities.iter_mut().find(|identity| identity.key == key) {
            Some(identity) => {
                let until = now
                    .checked_add_signed(self.cooldown)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                identity.exhausted = true;
                identity.exhausted_until = Some(until);
                tracing::warn!(
                    "[POOL] 身份 {} 触发限流，冷却至 {}",
                    key,
                    until.to_rfc3339()
                );
                true
            }
            None => false,
        }
    }

    /// 下一次选择时可用的身份数（不修改状态）
    pub fn available_count(&self) -> usize {
        let now = self.clock.now();
        self.inner
            .lock()
            .identities
            .iter()
            .filter(|identity| identity.is_selectable_at(now))
            .count()
    }

    /// 手动重置单个身份，未知 key 返回 false
    pub fn reset(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.identities.iter_mut().find(|identity| identity.key == key) {
            Some(identity) => {
                identity.reset();
                tracing::info!("[POOL] 身份 {} 已手动重置", key);
                true
            }
            None => false,
        }
    }

    /// 手动重置所有身份
    pub fn reset_all(&self) {
        let mut inner = self.inner.lock();
        for identity in inner.identities.iter_mut() {
            identity.reset();
        }
        tracing::info!("[POOL] 所有身份已重置");
    }

    /// 记录上游分配的主体 ID，未知 key 返回 false
    pub fn set_secondary_id(&self, key: &str, secondary_id: impl Into<String>) -> bool {
        let mut inner = self.inner.lock();
        match inner.identities.iter_mut().find(|identity| identity.key == key) {
            Some(identity) => {
                identity.secondary_id = Some(secondary_id.into());
                true
            }
            None => false,
        }
    }

    /// 每个身份的统计快照（只读）
    pub fn stats(&self) -> Vec<IdentityStats> {
        let now = self.clock.now();
        self.inner
            .lock()
            .identities
            .iter()
            .map(|identity| identity.stats_at(now))
            .collect()
    }

    /// 池状态汇总
    pub fn status(&self) -> PoolStatus {
        let now = self.clock.now();
        let inner = self.inner.lock();
        let total = inner.identities.len();
        let available = inner
            .identities
            .iter()
            .filter(|identity| identity.is_selectable_at(now))
            .count();

        PoolStatus {
            total,
            available,
            exhausted: total - available,
        }
    }
}

#[cfg(test)]
mod pool_tests {
    use super::*;
    use crate::clock::ManualClock;
    use proptest::prelude::*;

    fn identities(n: usize) -> Vec<Identity> {
        (0..n)
            .map(|i| Identity::new(format!("user{i}@example.com"), format!("token-{i}")))
            .collect()
    }

    fn pool_with_clock(n: usize) -> (IdentityPool, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let pool = IdentityPool::with_clock(
            identities(n),
            Duration::seconds(DEFAULT_COOLDOWN_SECS),
            clock.clone(),
        )
        .unwrap();
        (pool, clock)
    }

    fn select_key(pool: &IdentityPool) -> String {
        match pool.select_next().unwrap() {
            Selection::Ready(identity) => identity.key,
            Selection::Fallback(identity) => panic!("unexpected fallback: {}", identity.key),
        }
    }

    #[test]
    fn test_pool_rejects_duplicate_keys() {
        let mut ids = identities(2);
        ids.push(Identity::new("user0@example.com", "other"));
        let result = IdentityPool::new(ids);
        assert!(matches!(result, Err(PoolError::DuplicateKey(key)) if key == "user0@example.com"));
    }

    #[test]
    fn test_select_next_empty_pool() {
        let pool = IdentityPool::new(Vec::new()).unwrap();
        assert!(pool.is_empty());
        assert_eq!(pool.select_next(), Err(PoolError::EmptyPool));
        assert_eq!(pool.available_count(), 0);
    }

    #[test]
    fn test_round_robin_wraps_around() {
        let (pool, _clock) = pool_with_clock(3);

        assert_eq!(select_key(&pool), "user0@example.com");
        assert_eq!(select_key(&pool), "user1@example.com");
        assert_eq!(select_key(&pool), "user2@example.com");
        assert_eq!(select_key(&pool), "user0@example.com");

        let first = pool.get("user0@example.com").unwrap();
        assert_eq!(first.request_count, 2);
        assert!(first.last_used_at.is_some());
    }

    #[test]
    fn test_exhausted_identity_is_skipped() {
        let (pool, _clock) = pool_with_clock(3);
        assert!(pool.mark_exhausted("user1@example.com"));

        for _ in 0..6 {
            assert_ne!(select_key(&pool), "user1@example.com");
        }
    }

    #[test]
    fn test_cooldown_recovery_via_clock() {
        let (pool, clock) = pool_with_clock(3);
        assert_eq!(pool.available_count(), 3);

        select_key(&pool);
        select_key(&pool);
        assert_eq!(pool.get("user1@example.com").unwrap().request_count, 1);

        pool.mark_exhausted("user1@example.com");
        assert_eq!(pool.available_count(), 2);

        clock.advance(Duration::minutes(59));
        assert_eq!(pool.available_count(), 2);

        clock.advance(Duration::minutes(1));
        assert_eq!(pool.available_count(), 3);

        // 游标在 user2，跳过 user0 之后才会轮到 user1
        assert_eq!(select_key(&pool), "user2@example.com");
        assert_eq!(select_key(&pool), "user0@example.com");
        let recovered = pool.select_next().unwrap();
        assert_eq!(recovered.identity().key, "user1@example.com");
        // 恢复时清零，本次选择后为 1
        assert_eq!(recovered.identity().request_count, 1);
        assert!(!recovered.identity().exhausted);
    }

    #[test]
    fn test_recovery_zeroes_request_count() {
        let (pool, clock) = pool_with_clock(2);
        select_key(&pool);
        select_key(&pool);
        select_key(&pool);
        assert_eq!(pool.get("user0@example.com").unwrap().request_count, 2);

        pool.mark_exhausted("user0@example.com");
        clock.advance(Duration::hours(1));
        // 任何一次 select_next 都会先执行恢复扫描
        select_key(&pool);
        assert_eq!(pool.get("user0@example.com").unwrap().request_count, 0);
        assert!(!pool.get("user0@example.com").unwrap().exhausted);
    }

    #[test]
    fn test_fallback_returns_soonest_without_mutation() {
        let (pool, clock) = pool_with_clock(3);
        pool.mark_exhausted("user2@example.com");
        clock.advance(Duration::minutes(1));
        pool.mark_exhausted("user0@example.com");
        clock.advance(Duration::minutes(1));
        pool.mark_exhausted("user1@example.com");

        assert_eq!(pool.available_count(), 0);
        let before = pool.stats();

        let first = pool.select_next().unwrap();
        assert!(first.is_fallback());
        assert_eq!(first.identity().key, "user2@example.com");

        // 兜底分支不推进游标，重复调用返回同一个身份
        let second = pool.select_next().unwrap();
        assert_eq!(second, first);
        assert_eq!(pool.stats(), before);
    }

    #[test]
    fn test_mark_exhausted_extends_cooldown() {
        let (pool, clock) = pool_with_clock(1);
        pool.mark_exhausted("user0@example.com");
        let first_until = pool.get("user0@example.com").unwrap().exhausted_until;

        clock.advance(Duration::minutes(30));
        pool.mark_exhausted("user0@example.com");
        let second_until = pool.get("user0@example.com").unwrap().exhausted_until;
        assert_eq!(second_until, first_until.map(|t| t + Duration::minutes(30)));

        clock.advance(Duration::minutes(45));
        assert_eq!(pool.available_count(), 0);
    }

    #[test]
    fn test_mark_exhausted_saturates_huge_cooldown() {
        let clock = Arc::new(ManualClock::starting_now());
        let pool = IdentityPool::with_clock(
            identities(2),
            Duration::days(365 * 1_000_000),
            clock.clone(),
        )
        .unwrap();

        assert!(pool.mark_exhausted("user0@example.com"));
        let identity = pool.get("user0@example.com").unwrap();
        assert_eq!(identity.exhausted_until, Some(DateTime::<Utc>::MAX_UTC));
        assert_eq!(pool.available_count(), 1);
        assert!(pool.stats()[0].available_in_ms > 0);

        clock.advance(Duration::days(365));
        assert_eq!(pool.available_count(), 1);
    }

    #[test]
    fn test_unknown_key_is_noop() {
        let (pool, _clock) = pool_with_clock(2);
        let before = pool.stats();
        assert!(!pool.mark_exhausted("nobody"));
        assert!(!pool.reset("nobody"));
        assert!(!pool.set_secondary_id("nobody", "sub"));
        assert_eq!(pool.stats(), before);
    }

    #[test]
    fn test_reset_and_reset_all() {
        let (pool, _clock) = pool_with_clock(3);
        select_key(&pool);
        select_key(&pool);
        pool.mark_exhausted("user0@example.com");
        pool.mark_exhausted("user1@example.com");
        assert_eq!(pool.available_count(), 1);

        assert!(pool.reset("user0@example.com"));
        let reset = pool.get("user0@example.com").unwrap();
        assert!(!reset.exhausted);
        assert_eq!(reset.request_count, 0);
        assert!(reset.last_used_at.is_none());
        assert!(reset.exhausted_until.is_none());
        assert_eq!(pool.available_count(), 2);

        pool.reset_all();
        assert_eq!(pool.available_count(), 3);
        assert!(pool.stats().iter().all(|s| s.request_count == 0 && !s.exhausted));
    }

    #[test]
    fn test_stats_and_status() {
        let (pool, clock) = pool_with_clock(2);
        select_key(&pool);
        pool.mark_exhausted("user1@example.com");
        clock.advance(Duration::minutes(20));

        let stats = pool.stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].key, "user0@example.com");
        assert_eq!(stats[0].request_count, 1);
        assert_eq!(stats[0].available_in_ms, 0);
        assert!(stats[1].exhausted);
        assert_eq!(stats[1].available_in_ms, 40 * 60 * 1000);

        let status = pool.status();
        assert_eq!(
            status,
            PoolStatus {
                total: 2,
                available: 1,
                exhausted: 1
            }
        );
    }

    #[test]
    fn test_set_secondary_id() {
        let (pool, _clock) = pool_with_clock(1);
        assert!(pool.set_secondary_id("user0@example.com", "sub-123"));
        let selected = pool.select_next().unwrap().into_identity();
        assert_eq!(selected.secondary_id.as_deref(), Some("sub-123"));
    }

    proptest! {
        #[test]
        fn prop_rotation_visits_each_identity_once(n in 1usize..24, warmup in 0usize..24) {
            let (pool, _clock) = pool_with_clock(n);
            for _ in 0..warmup {
                select_key(&pool);
            }

            let keys = pool.keys();
            let start = warmup % n;
            let picked: Vec<String> = (0..n).map(|_| select_key(&pool)).collect();
            let expected: Vec<String> = (0..n).map(|i| keys[(start + i) % n].clone()).collect();
            prop_assert_eq!(picked, expected);
        }

        #[test]
        fn prop_exhausted_key_never_selected(n in 2usize..12, victim in 0usize..12, rounds in 1usize..40) {
            let victim = victim % n;
            let (pool, _clock) = pool_with_clock(n);
            let victim_key = format!("user{victim}@example.com");
            pool.mark_exhausted(&victim_key);

            for _ in 0..rounds {
                prop_assert_ne!(select_key(&pool), victim_key.clone());
            }
            prop_assert_eq!(pool.available_count(), n - 1);
        }

        #[test]
        fn prop_select_never_empty(n in 1usize..10, exhausted in 0usize..10) {
            let (pool, _clock) = pool_with_clock(n);
            for key in pool.keys().into_iter().take(exhausted) {
                pool.mark_exhausted(&key);
            }
            prop_assert!(pool.select_next().is_ok());
        }
    }
}
