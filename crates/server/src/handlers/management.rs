//! 身份池管理接口

use super::auth::verify_api_key;
use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ManageRequest {
    pub action: String,
    #[serde(default, alias = "email")]
    pub key: Option<String>,
    /// 上游分配的主体 ID，仅 `setSecondaryId` 使用
    #[serde(default, rename = "secondaryId")]
    pub secondary_id: Option<String>,
}

/// GET /api/identity-stats
pub async fn identity_stats(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(e) = verify_api_key(&headers, state.admin_api_key.as_deref()) {
        return e.into_response();
    }

    Json(serde_json::json!({ "identities": state.pool.stats() })).into_response()
}

/// POST /api/identity-stats
pub async fn manage_identities(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ManageRequest>, JsonRejection>,
) -> Response {
    if let Err(e) = verify_api_key(&headers, state.admin_api_key.as_deref()) {
        return e.into_response();
    }

    let request = match payload {
        Ok(Json(request)) => request,
        Err(_) => return invalid_request(),
    };

    match (request.action.as_str(), request.key.as_deref()) {
        ("reset", Some(key)) if !key.is_empty() => {
            if !state.pool.reset(key) {
                tracing::warn!("[SERVER] 重置未知身份: {}", key);
            }
            Json(serde_json::json!({
                "success": true,
                "message": format!("Identity {key} reset successfully"),
            }))
            .into_response()
        }
        ("setSecondaryId", Some(key)) if !key.is_empty() => {
            let Some(secondary_id) = request.secondary_id.filter(|id| !id.is_empty()) else {
                return invalid_request();
            };
            if !state.pool.set_secondary_id(key, secondary_id) {
                return (
                    StatusCode::NOT_FOUND,
                    Json(serde_json::json!({"error": format!("Unknown identity {key}")})),
                )
                    .into_response();
            }
            tracing::info!("[SERVER] 已记录身份 {} 的主体 ID", key);
            Json(serde_json::json!({
                "success": true,
                "message": format!("Identity {key} secondary id updated"),
            }))
            .into_response()
        }
        ("resetAll", _) => {
            state.pool.reset_all();
            Json(serde_json::json!({
                "success": true,
                "message": "All identities reset successfully",
            }))
            .into_response()
        }
        _ => invalid_request(),
    }
}

fn invalid_request() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": "Invalid action or missing key"})),
    )
        .into_response()
}
