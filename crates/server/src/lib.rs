//! HTTP API 服务器
//!
//! 对外提供对话接口、身份池管理接口和健康检查。

pub mod dispatch;
pub mod handlers;

use axum::{
    extract::{DefaultBodyLimit, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chatrelay_core::config::ServerConfig;
use chatrelay_core::{ChatStore, IdentityPool};
use dispatch::Dispatcher;
use std::sync::Arc;
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<IdentityPool>,
    pub dispatcher: Arc<Dispatcher>,
    /// 未启用数据库时为 None
    pub store: Option<Arc<dyn ChatStore>>,
    pub admin_api_key: Option<String>,
}

pub struct ServerState {
    pub config: ServerConfig,
    pub running: bool,
    app_state: AppState,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl ServerState {
    pub fn new(config: ServerConfig, app_state: AppState) -> Self {
        Self {
            config,
            running: false,
            app_state,
            shutdown_tx: None,
            handle: None,
        }
    }

    /// 绑定端口并在后台任务中运行服务
    pub async fn start(&mut self) -> Result<std::net::SocketAddr, Box<dyn std::error::Error + Send + Sync>> {
        if self.running {
            return Err("服务器已在运行".into());
        }

        let host = self.config.host.clone();
        let port = self.config.port;
        let addr: std::net::SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| format!("无效的监听地址 {host}:{port} - {e}"))?;

        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            format!("无法绑定到 {host}:{port}，错误: {e}。请检查地址是否有效或端口是否被占用。")
        })?;
        let local_addr = listener.local_addr()?;

        let (tx, rx) = oneshot::channel();
        self.shutdown_tx = Some(tx);

        let app = build_router(self.app_state.clone(), self.config.body_limit_bytes);
        self.handle = Some(tokio::spawn(async move {
            if let Err(e) = run_server(listener, app, rx).await {
                tracing::error!("[SERVER] 服务器错误: {}", e);
            }
        }));

        self.running = true;
        tracing::info!("[SERVER] 服务器监听于 {}", local_addr);
        Ok(local_addr)
    }

    /// 通知服务器停止并等待进行中的请求结束
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        self.running = false;
        tracing::info!("[SERVER] 服务器已停止");
    }
}

/// 构建路由
pub fn build_router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(handlers::chat))
        .route(
            "/api/identity-stats",
            get(handlers::identity_stats).post(handlers::manage_identities),
        )
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn run_server(
    listener: tokio::net::TcpListener,
    app: Router,
    shutdown: oneshot::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.await;
        })
        .await?;

    Ok(())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": chatrelay_core::version(),
        "pool": state.pool.status(),
    }))
}
