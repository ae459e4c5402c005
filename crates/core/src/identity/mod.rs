//! 身份池核心
//!
//! 包含身份类型定义和轮询调度器。冷却恢复在访问时惰性计算，
//! 没有后台定时器。

pub mod pool;
pub mod types;

pub use pool::{IdentityPool, PoolError, PoolStatus, DEFAULT_COOLDOWN_SECS};
pub use types::{Identity, IdentityStats, Selection};
