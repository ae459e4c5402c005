//! 上游服务客户端

pub mod chat_upstream;
