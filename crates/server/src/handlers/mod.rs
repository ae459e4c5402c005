//! HTTP 请求处理器

mod auth;
mod chat;
mod management;

pub use auth::verify_api_key;
pub use chat::{chat, ChatRequest, ChatResponse};
pub use management::{identity_stats, manage_identities, ManageRequest};
