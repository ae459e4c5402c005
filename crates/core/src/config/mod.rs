//! 配置管理
//!
//! YAML 配置文件的加载、校验和默认路径解析。

mod types;

pub use types::{
    Config, DatabaseConfig, DispatchConfig, IdentityConfig, LoggingConfig, PoolConfig,
    ServerConfig, UpstreamConfig,
};

use crate::identity::Identity;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// 冷却时间上限：10 年
pub const MAX_COOLDOWN_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("无法获取主目录")]
    HomeDirNotFound,
    #[error("读取配置文件失败 {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件失败: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("配置无效: {0}")]
    Invalid(String),
}

/// 应用数据目录 ~/.chatrelay
pub fn app_dir() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeDirNotFound)?;
    Ok(home.join(".chatrelay"))
}

/// 默认配置文件路径 ~/.chatrelay/config.yaml
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(app_dir()?.join("config.yaml"))
}

impl Config {
    /// 从 YAML 文本解析并校验
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载配置，文件不存在时返回默认配置
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::warn!("[CONFIG] 配置文件不存在，使用默认配置: {}", path.display());
            return Ok(Config::default());
        }

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&text)?;
        tracing::info!(
            "[CONFIG] 已加载配置: {} ({} 个身份)",
            path.display(),
            config.pool.identities.len()
        );
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.max_attempts 必须大于 0".to_string(),
            ));
        }
        if self.upstream.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("upstream.endpoint 不能为空".to_string()));
        }
        if self.pool.cooldown_secs == 0 || self.pool.cooldown_secs > MAX_COOLDOWN_SECS {
            return Err(ConfigError::Invalid(format!(
                "pool.cooldown_secs 必须在 1..={} 之间，当前为 {}",
                MAX_COOLDOWN_SECS, self.pool.cooldown_secs
            )));
        }

        let mut seen = HashSet::new();
        for identity in &self.pool.identities {
            if identity.key.trim().is_empty() {
                return Err(ConfigError::Invalid("身份 key 不能为空".to_string()));
            }
            if !seen.insert(identity.key.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "身份 key 重复: {}",
                    identity.key
                )));
            }
        }
        Ok(())
    }

    /// 身份冷却时长
    pub fn pool_cooldown(&self) -> Result<chrono::Duration, ConfigError> {
        i64::try_from(self.pool.cooldown_secs)
            .ok()
            .filter(|secs| *secs > 0 && *secs as u64 <= MAX_COOLDOWN_SECS)
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "pool.cooldown_secs 超出范围: {}",
                    self.pool.cooldown_secs
                ))
            })
    }

    /// 按配置顺序构建身份列表（即轮询顺序）
    pub fn identities(&self) -> Vec<Identity> {
        self.pool
            .identities
            .iter()
            .map(|entry| {
                Identity::new(entry.key.clone(), entry.credential_token.clone())
                    .with_secondary_id(entry.secondary_id.clone())
            })
            .collect()
    }

    /// 数据库文件路径
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.database.path {
            Some(path) => Ok(PathBuf::from(path)),
            None => Ok(app_dir()?.join("chatrelay.db")),
        }
    }
}
