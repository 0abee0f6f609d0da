//! SQLite 键值存储
//!
//! 跨重启持久化：会话凭据与任务记录落盘到单表 kv_store。

#![cfg(feature = "async-sqlite")]

use std::path::Path;

use async_trait::async_trait;
use sqlx::Row;

use crate::error::ElchError;
use crate::storage::Storage;

/// SQLite 实现：单表 kv_store(key TEXT PRIMARY KEY, value TEXT, updated_at TEXT)
pub struct SqliteStorage {
    pool: sqlx::sqlite::SqlitePool,
}

impl SqliteStorage {
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, ElchError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .map_err(|e| ElchError::Storage(e.to_string()))?;

        let storage = Self { pool };
        storage.init_tables().await?;
        Ok(storage)
    }

    async fn init_tables(&self) -> Result<(), ElchError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ElchError::Storage(e.to_string()))?;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, ElchError> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ElchError::Storage(e.to_string()))?;

        Ok(row.map(|r| r.get("value")))
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), ElchError> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)",
        )
        .bind(key)
        .bind(value)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| ElchError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ElchError> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| ElchError::Storage(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test_kv.db");

        let storage = SqliteStorage::new(&db_path).await.unwrap();
        storage.put("session:gmail:p1", "{\"cookie\":\"abc\"}").await.unwrap();
        storage.close().await;

        let storage2 = SqliteStorage::new(&db_path).await.unwrap();
        let value = storage2.get("session:gmail:p1").await.unwrap();
        assert_eq!(value, Some("{\"cookie\":\"abc\"}".to_string()));

        storage2.delete("session:gmail:p1").await.unwrap();
        assert_eq!(storage2.get("session:gmail:p1").await.unwrap(), None);
    }
}
