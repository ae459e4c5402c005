//! 对话接口
//!
//! `POST /api/chat` 始终返回 200，失败时 `response` 中是可展示给用户的提示。

use crate::dispatch::{DispatchRequest, GENERIC_FAILURE_REPLY};
use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    response::{IntoResponse, Response},
    Json,
};
use chatrelay_core::{ChatStore, MessageRole};
use serde::{Deserialize, Serialize};

/// 新会话的默认标题
const NEW_SESSION_TITLE: &str = "New Chat";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub web_search_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_search_used: Option<bool>,
}

impl ChatResponse {
    fn failure(text: &str) -> Self {
        Self {
            response: text.to_string(),
            session_id: None,
            web_search_used: None,
        }
    }
}

pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(e) => {
            tracing::warn!("[SERVER] 无效的对话请求: {}", e);
            return Json(ChatResponse::failure(GENERIC_FAILURE_REPLY)).into_response();
        }
    };

    let message_id = request
        .message_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let user_id = request.user_id.as_deref().filter(|id| !id.is_empty());
    let session_id = match (state.store.as_deref(), user_id) {
        (Some(store), Some(user_id)) => {
            let session_id = resolve_session(store, user_id, request.session_id.clone()).await;
            if let Some(session_id) = &session_id {
                persist(
                    store,
                    user_id,
                    session_id,
                    &message_id,
                    &request.message,
                    MessageRole::User,
                )
                .await;
            }
            session_id
        }
        _ => request.session_id.clone(),
    };

    let dispatch_request = DispatchRequest {
        message: request.message,
        message_id,
        web_search: request.web_search_enabled,
    };

    match state.dispatcher.dispatch(&dispatch_request).await {
        Ok(outcome) => {
            if let (Some(store), Some(user_id), Some(session_id)) =
                (state.store.as_deref(), user_id, session_id.as_deref())
            {
                let reply_id = uuid::Uuid::new_v4().to_string();
                persist(
                    store,
                    user_id,
                    session_id,
                    &reply_id,
                    &outcome.reply_text,
                    MessageRole::Assistant,
                )
                .await;
            }

            Json(ChatResponse {
                response: outcome.reply_text,
                session_id,
                web_search_used: Some(dispatch_request.web_search),
            })
            .into_response()
        }
        Err(e) => {
            tracing::warn!("[SERVER] 对话请求失败: {}", e);
            Json(ChatResponse {
                session_id,
                ..ChatResponse::failure(e.user_message())
            })
            .into_response()
        }
    }
}

/// 已有会话直接使用，否则为登录用户新建会话
async fn resolve_session(
    store: &dyn ChatStore,
    user_id: &str,
    session_id: Option<String>,
) -> Option<String> {
    if let Some(session_id) = session_id.filter(|id| !id.is_empty()) {
        return Some(session_id);
    }

    match store.create_session(user_id, NEW_SESSION_TITLE).await {
        Ok(session_id) => Some(session_id),
        Err(e) => {
            tracing::error!("[SERVER] 创建会话失败 (user={}): {}", user_id, e);
            None
        }
    }
}

async fn persist(
    store: &dyn ChatStore,
    user_id: &str,
    session_id: &str,
    message_id: &str,
    text: &str,
    role: MessageRole,
) {
    if let Err(e) = store
        .append_message(user_id, session_id, message_id, text, role)
        .await
    {
        tracing::error!(
            "[SERVER] 保存{}消息失败 (session={}): {}",
            role,
            session_id,
            e
        );
    }
}
