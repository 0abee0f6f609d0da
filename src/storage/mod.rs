//! 键值存储抽象
//!
//! Storage trait（get / put / delete）供会话凭据与任务记录持久化使用；
//! 默认内存实现，启用 async-sqlite feature 后提供 SQLite 实现。

mod memory;
#[cfg(feature = "async-sqlite")]
mod sqlite;

pub use memory::MemoryStorage;
#[cfg(feature = "async-sqlite")]
pub use sqlite::SqliteStorage;

use async_trait::async_trait;

use crate::error::ElchError;

/// 键值存储 trait：值为字符串（通常是 JSON 序列化结果）
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, ElchError>;

    async fn put(&self, key: &str, value: &str) -> Result<(), ElchError>;

    async fn delete(&self, key: &str) -> Result<(), ElchError>;
}
