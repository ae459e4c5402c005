pub mod dao;
pub mod schema;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub type DbConnection = Arc<Mutex<Connection>>;

/// 获取数据库连接锁（自动处理 poisoned lock）
pub fn lock_db(db: &DbConnection) -> Result<std::sync::MutexGuard<'_, Connection>, String> {
    match db.lock() {
        Ok(guard) => Ok(guard),
        Err(poisoned) => {
            tracing::warn!("[数据库] 检测到数据库锁被污染，尝试恢复: {}", poisoned);
            db.clear_poison();
            Ok(poisoned.into_inner())
        }
    }
}

/// 打开数据库文件并初始化表结构
pub fn open_database(path: &Path) -> Result<DbConnection, String> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| format!("无法创建数据库目录 {dir:?}: {e}"))?;
    }

    let conn = Connection::open(path).map_err(|e| e.to_string())?;

    // 设置 busy_timeout 为 5 秒，避免 "database is locked" 错误
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(|e| format!("设置 busy_timeout 失败: {e}"))?;

    schema::create_tables(&conn).map_err(|e| e.to_string())?;
    tracing::info!("[数据库] 已打开: {}", path.display());
    Ok(Arc::new(Mutex::new(conn)))
}

/// 内存数据库（测试用）
pub fn open_in_memory() -> Result<DbConnection, String> {
    let conn = Connection::open_in_memory().map_err(|e| e.to_string())?;
    schema::create_tables(&conn).map_err(|e| e.to_string())?;
    Ok(Arc::new(Mutex::new(conn)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_database_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("relay.db");
        let db = open_database(&path).unwrap();
        assert!(path.exists());

        let conn = lock_db(&db).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM chat_sessions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
