//! ChatRelay Providers Crate
//!
//! 上游对话服务客户端、错误分类和回复清洗。

pub mod converter;
pub mod error;
pub mod providers;

pub use converter::reply_cleaner::{clean_reply, is_plausible_reply};
pub use error::{UpstreamError, UpstreamErrorKind};
pub use providers::chat_upstream::{ChatUpstream, HttpChatUpstream, UpstreamRequest};
