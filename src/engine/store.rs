//! 任务存储
//!
//! 内存为主，每次保存同时写穿到 Storage，进程重启后 get 能从存储恢复任务
//! 并按 current_step 继续。持久化失败只记日志，不阻断执行。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::engine::task::Task;
use crate::storage::Storage;

fn task_key(run_id: &str) -> String {
    format!("task:{run_id}")
}

/// 任务存储：内存缓存 + 写穿持久化
pub struct TaskStore {
    tasks: RwLock<HashMap<String, Task>>,
    user_tasks: RwLock<HashMap<String, Vec<String>>>,
    storage: Arc<dyn Storage>,
}

impl TaskStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            user_tasks: RwLock::new(HashMap::new()),
            storage,
        }
    }

    /// 保存（插入或覆盖）并持久化
    pub async fn save(&self, task: &Task) {
        {
            let mut tasks = self.tasks.write().await;
            let mut user_tasks = self.user_tasks.write().await;
            if !tasks.contains_key(&task.run_id) {
                user_tasks
                    .entry(task.user_id.clone())
                    .or_default()
                    .push(task.run_id.clone());
            }
            tasks.insert(task.run_id.clone(), task.clone());
        }

        match serde_json::to_string(task) {
            Ok(blob) => {
                if let Err(e) = self.storage.put(&task_key(&task.run_id), &blob).await {
                    tracing::warn!(error = %e, run_id = %task.run_id, "task persist failed");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, run_id = %task.run_id, "task serialize failed");
            }
        }
    }

    /// 读取：内存未命中时回退到持久存储并回填缓存
    pub async fn get(&self, run_id: &str) -> Option<Task> {
        if let Some(task) = self.tasks.read().await.get(run_id) {
            return Some(task.clone());
        }

        let blob = self.storage.get(&task_key(run_id)).await.ok().flatten()?;
        let task: Task = match serde_json::from_str(&blob) {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!(error = %e, run_id, "stored task deserialize failed");
                return None;
            }
        };

        let mut tasks = self.tasks.write().await;
        let mut user_tasks = self.user_tasks.write().await;
        user_tasks
            .entry(task.user_id.clone())
            .or_default()
            .push(task.run_id.clone());
        tasks.insert(task.run_id.clone(), task.clone());
        Some(task)
    }

    pub async fn list_for_user(&self, user_id: &str) -> Vec<Task> {
        let user_tasks = self.user_tasks.read().await;
        let tasks = self.tasks.read().await;
        user_tasks
            .get(user_id)
            .map(|ids| ids.iter().filter_map(|id| tasks.get(id).cloned()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::task::{StepAction, StepSpec};
    use crate::storage::MemoryStorage;

    fn one_step_task(user: &str) -> Task {
        Task::new(
            user,
            vec![StepSpec {
                action: StepAction::Tool {
                    name: "echo".to_string(),
                },
                params: serde_json::json!({"text": "x"}),
                thought: None,
            }],
        )
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let store = TaskStore::new(Arc::new(MemoryStorage::new()));
        let task = one_step_task("u1");
        store.save(&task).await;

        let loaded = store.get(&task.run_id).await.unwrap();
        assert_eq!(loaded.run_id, task.run_id);
        assert_eq!(store.list_for_user("u1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_restore_from_storage() {
        let storage = Arc::new(MemoryStorage::new());
        let task = one_step_task("u1");
        {
            let store = TaskStore::new(storage.clone());
            store.save(&task).await;
        }

        // 新的 store 实例模拟进程重启
        let store = TaskStore::new(storage);
        let loaded = store.get(&task.run_id).await.unwrap();
        assert_eq!(loaded.user_id, "u1");
    }
}
