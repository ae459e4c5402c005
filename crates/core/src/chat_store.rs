//! 对话持久化
//!
//! 派发流程只依赖 `ChatStore` 接口：创建会话、追加消息。
//! `SqliteChatStore` 是基于 `ChatDao` 的默认实现。

use crate::database::dao::chat::{ChatDao, ChatMessage, ChatSession, MessageRole};
use crate::database::{lock_db, DbConnection};
use async_trait::async_trait;
use chrono::Utc;

/// 持久化错误
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("数据库锁获取失败: {0}")]
    Lock(String),
    #[error("数据库错误: {0}")]
    Sql(#[from] rusqlite::Error),
}

/// 对话存储接口
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// 创建新会话，返回会话 ID
    async fn create_session(&self, user_id: &str, title: &str) -> Result<String, StoreError>;

    /// 追加一条消息
    async fn append_message(
        &self,
        user_id: &str,
        session_id: &str,
        message_id: &str,
        text: &str,
        role: MessageRole,
    ) -> Result<(), StoreError>;
}

/// SQLite 对话存储
#[derive(Clone)]
pub struct SqliteChatStore {
    db: DbConnection,
}

impl SqliteChatStore {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    /// 读取会话全部消息
    pub fn messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
        let conn = lock_db(&self.db).map_err(StoreError::Lock)?;
        Ok(ChatDao::list_messages(&conn, session_id)?)
    }
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    async fn create_session(&self, user_id: &str, title: &str) -> Result<String, StoreError> {
        let conn = lock_db(&self.db).map_err(StoreError::Lock)?;
        let now = Utc::now().to_rfc3339();
        let session = ChatSession {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            created_at: now.clone(),
            updated_at: now,
        };
        ChatDao::create_session(&conn, &session)?;
        tracing::debug!("[ChatStore] 创建会话: {} (user={})", session.id, user_id);
        Ok(session.id)
    }

    async fn append_message(
        &self,
        user_id: &str,
        session_id: &str,
        message_id: &str,
        text: &str,
        role: MessageRole,
    ) -> Result<(), StoreError> {
        let conn = lock_db(&self.db).map_err(StoreError::Lock)?;
        let message = ChatMessage {
            id: message_id.to_string(),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            role,
            content: text.to_string(),
            created_at: Utc::now().to_rfc3339(),
        };
        ChatDao::insert_message(&conn, &message)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_in_memory;

    #[tokio::test]
    async fn test_create_session_and_append() {
        let store = SqliteChatStore::new(open_in_memory().unwrap());

        let session_id = store.create_session("user-1", "New Chat").await.unwrap();
        assert!(!session_id.is_empty());

        store
            .append_message("user-1", &session_id, "m1", "hello", MessageRole::User)
            .await
            .unwrap();
        store
            .append_message(
                "user-1",
                &session_id,
                "m2",
                "hi there",
                MessageRole::Assistant,
            )
            .await
            .unwrap();

        let messages = store.messages(&session_id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[1].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn test_sessions_are_distinct() {
        let store = SqliteChatStore::new(open_in_memory().unwrap());
        let a = store.create_session("user-1", "New Chat").await.unwrap();
        let b = store.create_session("user-1", "New Chat").await.unwrap();
        assert_ne!(a, b);
    }
}
