//! 配置类型定义

use serde::{Deserialize, Serialize};

/// 主配置
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub dispatch: DispatchConfig,
    pub pool: PoolConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

/// HTTP 服务配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 管理接口 API key，未设置时管理接口不鉴权
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_api_key: Option<String>,
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8999,
            admin_api_key: None,
            body_limit_bytes: 1024 * 1024,
        }
    }
}

/// 上游对话服务配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpstreamConfig {
    pub endpoint: String,
    pub user_agent: String,
    pub system_prompt: String,
    pub agent_name: String,
    pub max_tokens: u32,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://www.blackbox.ai/api/chat".to_string(),
            user_agent: format!("chatrelay/{}", env!("CARGO_PKG_VERSION")),
            system_prompt: "You are a helpful AI assistant.".to_string(),
            agent_name: "VscodeAgent".to_string(),
            max_tokens: 4096,
            connect_timeout_secs: 30,
            request_timeout_secs: 120,
        }
    }
}

/// 重试派发配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    pub max_attempts: u32,
    pub rate_limit_backoff_ms: u64,
    pub server_error_backoff_ms: u64,
    pub attempt_timeout_secs: u64,
    pub min_reply_chars: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            rate_limit_backoff_ms: 500,
            server_error_backoff_ms: 1000,
            attempt_timeout_secs: 120,
            min_reply_chars: 10,
        }
    }
}

/// 身份池配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    pub cooldown_secs: u64,
    pub identities: Vec<IdentityConfig>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 60 * 60,
            identities: Vec::new(),
        }
    }
}

/// 单个身份的配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityConfig {
    pub key: String,
    pub credential_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_id: Option<String>,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub enabled: bool,
    /// 数据库文件路径，未设置时使用 ~/.chatrelay/chatrelay.db
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
