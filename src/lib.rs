//! ChatRelay - 带身份轮换的对话转发服务
//!
//! ## Workspace 结构
//! - `chatrelay-core`：身份池、配置、时钟、对话持久化
//! - `chatrelay-providers`：上游客户端、错误分类、回复清洗
//! - `chatrelay-server`：派发循环与 HTTP 接口
//! - 主 crate 只负责启动引导

pub mod app;

pub use app::run;
