//! 上游响应转换

pub mod reply_cleaner;
