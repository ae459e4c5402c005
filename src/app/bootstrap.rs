//! 应用启动引导模块
//!
//! 包含配置路径解析、日志初始化和共享状态构建。

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

use chatrelay_core::config::default_config_path;
use chatrelay_core::database::open_database;
use chatrelay_core::{ChatStore, Config, IdentityPool, SqliteChatStore, SystemClock};
use chatrelay_providers::HttpChatUpstream;
use chatrelay_server::dispatch::{Dispatcher, RetryPolicy};
use chatrelay_server::AppState;

/// 配置加载前使用的日志级别
const BOOT_LOG_LEVEL: &str = "info";

/// 日志级别热更新句柄
pub type LogHandle = reload::Handle<EnvFilter, Registry>;

/// 命令行参数
#[derive(Debug, Clone, Parser)]
#[command(name = "chatrelay")]
#[command(about = "Chat API relay with identity rotation", version)]
pub struct CliArgs {
    /// 配置文件路径，默认 ~/.chatrelay/config.yaml
    #[arg(short, long, env = "CHATRELAY_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// 加载并校验配置
pub fn load_and_validate_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = Config::load(&path)
        .with_context(|| format!("加载配置失败: {}", path.display()))?;
    config.validate().context("配置校验失败")?;
    Ok((config, path))
}

/// 初始化日志
///
/// 配置加载前先以默认级别安装，返回的句柄用于切换到配置中的级别。
/// 已有全局 subscriber 时返回 None。
pub fn init_logging() -> Option<LogHandle> {
    let (filter, handle) = reload::Layer::new(env_filter_or(BOOT_LOG_LEVEL));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .ok()
        .map(|_| handle)
}

/// 切换到配置中的日志级别，`RUST_LOG` 优先
pub fn apply_log_level(handle: &LogHandle, level: &str) {
    if let Err(e) = handle.reload(env_filter_or(level)) {
        tracing::warn!("[启动] 切换日志级别失败: {}", e);
    }
}

fn env_filter_or(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// 根据配置构建服务共享状态
pub fn build_app_state(config: &Config) -> Result<AppState> {
    let identities = config.identities();
    let cooldown = config.pool_cooldown()?;
    let pool = Arc::new(
        IdentityPool::with_clock(identities, cooldown, Arc::new(SystemClock))
            .context("构建身份池失败")?,
    );
    if pool.is_empty() {
        tracing::warn!("[启动] 未配置任何身份，所有对话请求都会失败");
    } else {
        tracing::info!("[启动] 已加载 {} 个身份", pool.len());
        tracing::debug!("[启动] 身份轮询顺序: {:?}", pool.keys());
    }

    let upstream = Arc::new(HttpChatUpstream::new(config.upstream.clone()));
    let dispatcher = Arc::new(Dispatcher::new(
        pool.clone(),
        upstream,
        RetryPolicy::from(&config.dispatch),
    ));

    let store: Option<Arc<dyn ChatStore>> = if config.database.enabled {
        let path = config.database_path()?;
        let db = open_database(&path)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("打开数据库失败: {}", path.display()))?;
        tracing::info!("[数据库] 对话记录保存到 {}", path.display());
        Some(Arc::new(SqliteChatStore::new(db)))
    } else {
        tracing::info!("[数据库] 未启用对话持久化");
        None
    };

    Ok(AppState {
        pool,
        dispatcher,
        store,
        admin_api_key: config.server.admin_api_key.clone(),
    })
}
