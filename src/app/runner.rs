//! 应用运行器模块
//!
//! 加载配置、启动 HTTP 服务，收到 Ctrl-C 后优雅退出。

use anyhow::{Context, Result};

use chatrelay_server::ServerState;

use super::bootstrap::{self, CliArgs};

/// 运行服务直到收到退出信号
///
/// 1. 以默认级别初始化日志
/// 2. 加载配置并切换到配置中的日志级别
/// 3. 构建身份池、派发器和对话存储
/// 4. 启动 HTTP 服务并等待 Ctrl-C
pub async fn run(args: CliArgs) -> Result<()> {
    let log_handle = bootstrap::init_logging();

    let (config, config_path) = bootstrap::load_and_validate_config(args.config)?;
    if let Some(handle) = &log_handle {
        bootstrap::apply_log_level(handle, &config.logging.level);
    }
    tracing::info!(
        "[启动] chatrelay {} 使用配置 {}",
        chatrelay_core::version(),
        config_path.display()
    );

    let app_state = bootstrap::build_app_state(&config)?;
    let mut server = ServerState::new(config.server.clone(), app_state);
    server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("启动 HTTP 服务失败")?;

    tokio::signal::ctrl_c()
        .await
        .context("监听退出信号失败")?;
    tracing::info!("[启动] 收到退出信号，正在停止服务");
    server.stop().await;

    Ok(())
}
