//! 管理接口鉴权

use axum::{
    http::{HeaderMap, StatusCode},
    Json,
};

/// 校验请求头中的 API key
///
/// 支持 `Authorization: Bearer <key>` 和 `x-api-key: <key>`。
/// 未配置 key 时不做校验。
pub fn verify_api_key(
    headers: &HeaderMap,
    expected_key: Option<&str>,
) -> Result<(), (StatusCode, Json<serde_json::Value>)> {
    let Some(expected_key) = expected_key else {
        return Ok(());
    };

    let auth = headers
        .get("authorization")
        .or_else(|| headers.get("x-api-key"))
        .and_then(|v| v.to_str().ok());

    let key = match auth {
        Some(s) => s.strip_prefix("Bearer ").unwrap_or(s),
        None => {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": {"message": "No API key provided"}})),
            ))
        }
    };

    if key != expected_key {
        tracing::warn!("[SERVER] 管理接口 API key 校验失败");
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": {"message": "Invalid API key"}})),
        ));
    }

    Ok(())
}
