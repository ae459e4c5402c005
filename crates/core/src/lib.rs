//! ChatRelay Core Crate
//!
//! 包含身份池调度器、配置、时钟抽象和对话持久化。
//!
//! ## 模块结构
//! - `identity`: 身份类型与轮询调度器
//! - `clock`: 可注入的时间来源
//! - `config`: 配置管理（类型、YAML 加载、校验）
//! - `database`: SQLite 连接与表结构
//! - `chat_store`: 对话持久化接口

pub mod chat_store;
pub mod clock;
pub mod config;
pub mod database;
pub mod identity;

// 重新导出常用类型
pub use chat_store::{ChatStore, SqliteChatStore, StoreError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use database::dao::chat::MessageRole;
pub use identity::{Identity, IdentityPool, IdentityStats, PoolError, PoolStatus, Selection};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
