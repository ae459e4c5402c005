//! 上游对话服务客户端
//!
//! 每次尝试发出一个 POST 请求，请求体携带身份的校验串和会话信息。
//! 非成功状态码在这里就被分类为 `UpstreamErrorKind`。

use crate::error::UpstreamError;
use async_trait::async_trait;
use chatrelay_core::config::UpstreamConfig;
use chatrelay_core::Identity;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// 单次对话请求
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRequest {
    pub message: String,
    pub message_id: String,
    pub web_search: bool,
}

/// 上游对话服务
#[async_trait]
pub trait ChatUpstream: Send + Sync {
    /// 使用指定身份发送一次请求，成功时返回原始响应体
    async fn send(
        &self,
        identity: &Identity,
        request: &UpstreamRequest,
    ) -> Result<String, UpstreamError>;
}

/// 基于 reqwest 的上游客户端
pub struct HttpChatUpstream {
    pub config: UpstreamConfig,
    pub client: Client,
}

/// 创建配置好的 HTTP 客户端
fn create_http_client(config: &UpstreamConfig) -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .tcp_keepalive(Duration::from_secs(60))
        .user_agent(config.user_agent.clone())
        .gzip(true)
        .brotli(true)
        .deflate(true)
        .build()
        .unwrap_or_else(|_| Client::new())
}

impl HttpChatUpstream {
    pub fn new(config: UpstreamConfig) -> Self {
        let client = create_http_client(&config);
        Self { config, client }
    }

    /// 构建上游请求体
    pub fn build_payload(&self, identity: &Identity, request: &UpstreamRequest) -> Value {
        let web = request.web_search;
        json!({
            "messages": [{
                "id": request.message_id,
                "content": request.message,
                "role": "user",
            }],
            "id": request.message_id,
            "previewToken": null,
            "userId": null,
            "codeModelMode": true,
            "trendingAgentMode": {},
            "isMicMode": false,
            "userSystemPrompt": self.config.system_prompt,
            "maxTokens": self.config.max_tokens,
            "playgroundTopP": null,
            "playgroundTemperature": null,
            "isChromeExt": false,
            "githubToken": "",
            "clickedForceWebSearch": web,
            "isMemoryEnabled": false,
            "mobileClient": false,
            "userSelectedModel": null,
            "userSelectedAgent": self.config.agent_name,
            "validated": identity.credential_token,
            "imageGenerationMode": false,
            "webSearchModePrompt": web,
            "deepSearchMode": false,
            "domains": null,
            "codeInterpreterMode": false,
            "webSearchModeOption": {
                "autoMode": web,
                "webMode": web,
                "offlineMode": !web,
            },
            "session": {
                "user": {
                    "email": identity.key,
                    "id": identity.secondary_id,
                },
                "expires": (chrono::Utc::now() + chrono::Duration::hours(24)).to_rfc3339(),
                "isNewUser": false,
            },
            "beastMode": false,
            "reasoningMode": false,
            "asyncMode": false,
            "integrations": {},
            "isTaskPersistent": false,
        })
    }
}

#[async_trait]
impl ChatUpstream for HttpChatUpstream {
    async fn send(
        &self,
        identity: &Identity,
        request: &UpstreamRequest,
    ) -> Result<String, UpstreamError> {
        let payload = self.build_payload(identity, request);

        let resp = self
            .client
            .post(&self.config.endpoint)
            .header("Content-Type", "application/json")
            .header("Accept", "*/*")
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(
                "[UPSTREAM] 身份 {} 请求失败: status={}",
                identity.key,
                status.as_u16()
            );
            return Err(UpstreamError::from_http_status(status.as_u16(), &body));
        }

        let body = resp.text().await?;
        tracing::debug!("[UPSTREAM] 原始响应长度: {}", body.len());
        Ok(body)
    }
}
