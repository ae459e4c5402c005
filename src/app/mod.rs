//! 应用核心模块
//!
//! ## 模块结构
//! - `bootstrap` - 应用启动引导（参数解析、配置加载、状态构建）
//! - `runner` - 应用运行器（启动服务、等待退出信号）

pub mod bootstrap;
pub mod runner;

pub use runner::run;
