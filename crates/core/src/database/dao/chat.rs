//! 对话数据访问层
//!
//! 会话和消息的 SQLite 存储

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

// ============================================================================
// 数据模型
// ============================================================================

/// 消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            _ => Err(format!("未知的消息角色: {}", s)),
        }
    }
}

/// 会话
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatSession {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

/// 消息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: String,
}

// ============================================================================
// 数据访问对象
// ============================================================================

/// 对话 DAO
pub struct ChatDao;

impl ChatDao {
    /// 创建新会话
    pub fn create_session(conn: &Connection, session: &ChatSession) -> Result<(), rusqlite::Error> {
        conn.execute(
            "INSERT INTO chat_sessions (id, user_id, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.id,
                session.user_id,
                session.title,
                session.created_at,
                session.updated_at,
            ],
        )?;
        Ok(())
    }

    /// 获取会话
    pub fn get_session(
        conn: &Connection,
        session_id: &str,
    ) -> Result<Option<ChatSession>, rusqlite::Error> {
        conn.query_row(
            "SELECT id, user_id, title, created_at, updated_at
             FROM chat_sessions WHERE id = ?",
            [session_id],
            |row| {
                Ok(ChatSession {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    title: row.get(2)?,
                    created_at: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            },
        )
        .optional()
    }

    /// 追加消息，同一会话内的重复消息 ID 会覆盖旧内容
    pub fn insert_message(conn: &Connection, message: &ChatMessage) -> Result<(), rusqlite::Error> {
        conn.execute(
            "INSERT OR REPLACE INTO chat_messages (id, session_id, user_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id,
                message.session_id,
                message.user_id,
                message.role.to_string(),
                message.content,
                message.created_at,
            ],
        )?;

        conn.execute(
            "UPDATE chat_sessions SET updated_at = ? WHERE id = ?",
            params![message.created_at, message.session_id],
        )?;
        Ok(())
    }

    /// 按时间顺序获取会话消息
    pub fn list_messages(
        conn: &Connection,
        session_id: &str,
    ) -> Result<Vec<ChatMessage>, rusqlite::Error> {
        let mut stmt = conn.prepare(
            "SELECT id, session_id, user_id, role, content, created_at
             FROM chat_messages WHERE session_id = ? ORDER BY created_at ASC, rowid ASC",
        )?;

        let messages = stmt
            .query_map([session_id], |row| {
                let role: String = row.get(3)?;
                Ok(ChatMessage {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    user_id: row.get(2)?,
                    role: role.parse().unwrap_or(MessageRole::User),
                    content: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(messages)
    }
}
