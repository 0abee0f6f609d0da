//! 任务执行器
//!
//! 串行驱动步骤：服务步骤经调度器（含会话获取与释放），工具步骤经工具执行器。
//! Unverified 同一步最多再试 max_step_retries 次；会话占用（未排队）让任务暂停；
//! 任务墙钟超限也暂停而不是杀会话。每步之后保存任务并广播进度事件。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{DispatchOutcome, ServiceRegistry};
use crate::engine::store::TaskStore;
use crate::engine::task::{Step, StepAction, StepSpec, Task, TaskStatus};
use crate::error::ElchError;
use crate::events::EventBroadcaster;
use crate::session::SessionRegistry;
use crate::tools::ToolExecutor;

/// 执行参数
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Unverified 的额外重试次数
    pub max_step_retries: u32,
    /// 单次 dispatch 超时
    pub step_timeout: Duration,
    /// 任务墙钟上限，超限暂停
    pub task_deadline: Duration,
    /// 会话被占用时是否排队（false 则任务暂停）
    pub queue_sessions: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_step_retries: 2,
            step_timeout: Duration::from_secs(60),
            task_deadline: Duration::from_secs(600),
            queue_sessions: false,
        }
    }
}

/// 任务执行引擎
pub struct TaskEngine {
    dispatcher: Arc<ServiceRegistry>,
    sessions: Arc<SessionRegistry>,
    tools: ToolExecutor,
    store: TaskStore,
    events: Arc<EventBroadcaster>,
    config: EngineConfig,
    /// 在途驱动方登记表，值同时是该次驱动的取消令牌
    cancels: Mutex<HashMap<String, CancellationToken>>,
}

impl TaskEngine {
    pub fn new(
        dispatcher: Arc<ServiceRegistry>,
        sessions: Arc<SessionRegistry>,
        tools: ToolExecutor,
        store: TaskStore,
        events: Arc<EventBroadcaster>,
        config: EngineConfig,
    ) -> Self {
        Self {
            dispatcher,
            sessions,
            tools,
            store,
            events,
            config,
            cancels: Mutex::new(HashMap::new()),
        }
    }

    /// 提交任务（Pending，不执行）
    pub async fn submit(&self, user_id: &str, specs: Vec<StepSpec>) -> Task {
        let task = Task::new(user_id, specs);
        self.store.save(&task).await;
        tracing::info!(run_id = %task.run_id, steps = task.steps.len(), "task submitted");
        task
    }

    /// 执行任务：从 current_step 驱动到终态或暂停；同一 run_id 同时只允许一个驱动方
    pub async fn execute(&self, run_id: &str) -> Result<Task, ElchError> {
        let cancel = self.begin(run_id).await?;
        let result = async {
            let mut task = self
                .store
                .get(run_id)
                .await
                .ok_or_else(|| ElchError::TaskNotFound(run_id.to_string()))?;

            if task.status.is_terminal() {
                return Ok(task);
            }

            task.status = TaskStatus::Running;
            task.touch();
            self.store.save(&task).await;

            Ok(self.drive(task, cancel).await)
        }
        .await;
        self.finish(run_id).await;
        result
    }

    /// 恢复任务：from_step 缺省为 current_step；对 Completed 任务是幂等空操作
    pub async fn resume(&self, run_id: &str, from_step: Option<usize>) -> Result<Task, ElchError> {
        let cancel = self.begin(run_id).await?;
        let result = async {
            let mut task = self
                .store
                .get(run_id)
                .await
                .ok_or_else(|| ElchError::TaskNotFound(run_id.to_string()))?;

            if task.status == TaskStatus::Completed {
                tracing::debug!(run_id, "resume on completed task is a no-op");
                return Ok(task);
            }

            let k = from_step.unwrap_or(task.current_step);
            if k > task.current_step {
                return Err(ElchError::InvalidResume {
                    requested: k,
                    current: task.current_step,
                });
            }

            task.reset_from(k);
            task.status = TaskStatus::Running;
            self.store.save(&task).await;
            tracing::info!(run_id, from_step = k, "task resumed");

            Ok(self.drive(task, cancel).await)
        }
        .await;
        self.finish(run_id).await;
        result
    }

    /// 登记在途驱动方；已有同 run_id 的驱动方时拒绝
    async fn begin(&self, run_id: &str) -> Result<CancellationToken, ElchError> {
        let mut cancels = self.cancels.lock().await;
        if cancels.contains_key(run_id) {
            return Err(ElchError::TaskRunning(run_id.to_string()));
        }
        let token = CancellationToken::new();
        cancels.insert(run_id.to_string(), token.clone());
        Ok(token)
    }

    async fn finish(&self, run_id: &str) {
        self.cancels.lock().await.remove(run_id);
    }

    /// 协作式取消：当前步骤跑完后生效
    pub async fn cancel(&self, run_id: &str) {
        if let Some(token) = self.cancels.lock().await.get(run_id) {
            token.cancel();
            tracing::info!(run_id, "task cancel requested");
        }
    }

    pub async fn get(&self, run_id: &str) -> Option<Task> {
        self.store.get(run_id).await
    }

    pub async fn list_for_user(&self, user_id: &str) -> Vec<Task> {
        self.store.list_for_user(user_id).await
    }

    async fn drive(&self, mut task: Task, cancel: CancellationToken) -> Task {
        let deadline = Instant::now() + self.config.task_deadline;

        while task.current_step < task.steps.len() {
            if cancel.is_cancelled() {
                task.status = TaskStatus::Failed;
                task.error = Some(ElchError::Cancelled.to_string());
                task.touch();
                self.store.save(&task).await;
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!(run_id = %task.run_id, "task deadline reached, pausing");
                task.status = TaskStatus::Paused;
                task.touch();
                self.store.save(&task).await;
                break;
            }

            let idx = task.current_step;
            let outcome = self.run_step(&mut task.steps[idx]).await;

            match outcome {
                Ok(result) => {
                    task.steps[idx].result = Some(result.clone());
                    task.current_step += 1;
                    if task.current_step == task.steps.len() {
                        task.status = TaskStatus::Completed;
                        task.final_result = Some(result);
                    }
                }
                Err(ElchError::SessionBusy { service, profile }) => {
                    // 步骤未动，恢复后从这一步继续
                    tracing::info!(run_id = %task.run_id, %service, %profile, "session busy, pausing task");
                    task.status = TaskStatus::Paused;
                }
                Err(e) => {
                    task.steps[idx].error = Some(e.to_string());
                    task.status = TaskStatus::Failed;
                    task.error = Some(e.to_string());
                }
            }

            task.touch();
            self.store.save(&task).await;
            self.publish_progress(&task, idx);

            if task.status != TaskStatus::Running {
                break;
            }
        }

        task
    }

    fn publish_progress(&self, task: &Task, idx: usize) {
        let step = &task.steps[idx];
        let payload = serde_json::json!({
            "run_id": task.run_id,
            "step": idx,
            "total_steps": task.steps.len(),
            "status": task.status.as_str(),
            "result": step.result,
            "error": step.error,
            "retries": step.retries,
        });
        self.events.publish(&task.user_id, "progress", payload);
    }

    async fn run_step(&self, step: &mut Step) -> Result<String, ElchError> {
        match step.action.clone() {
            StepAction::Tool { name } => self.tools.execute(&name, step.params.clone()).await,
            StepAction::Service { service, action } => {
                self.run_service_step(step, &service, &action).await
            }
        }
    }

    async fn run_service_step(
        &self,
        step: &mut Step,
        service: &str,
        action: &str,
    ) -> Result<String, ElchError> {
        let profile = step
            .params
            .get("profile")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| format!("{service}_profile"));

        let handle = self
            .sessions
            .acquire(service, &profile, self.config.queue_sessions)
            .await?;

        let mut attempts: u32 = 0;
        let result = loop {
            let dispatched = timeout(
                self.config.step_timeout,
                self.dispatcher.dispatch(service, action, &step.params, &handle),
            )
            .await;

            match dispatched {
                Ok(Ok(DispatchOutcome::Success(msg))) => {
                    step.retries = attempts;
                    break Ok(msg);
                }
                Ok(Ok(DispatchOutcome::Unverified(detail))) => {
                    attempts += 1;
                    step.retries = attempts;
                    if attempts > self.config.max_step_retries {
                        break Err(ElchError::Unverified { attempts, detail });
                    }
                    tracing::warn!(service, action, attempts, "unverified outcome, retrying");
                }
                Ok(Err(e)) => break Err(e),
                Err(_) => break Err(ElchError::ActionFailed("dispatch timed out".to_string())),
            }
        };

        if let Err(e) = self.sessions.release(handle).await {
            tracing::warn!(error = %e, service, "session release failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::MockEngine;
    use crate::storage::MemoryStorage;
    use crate::tools::{EchoTool, ToolRegistry};

    fn tool_step(text: &str) -> StepSpec {
        StepSpec {
            action: StepAction::Tool {
                name: "echo".to_string(),
            },
            params: serde_json::json!({"text": text}),
            thought: None,
        }
    }

    fn engine_with(mock: Arc<MockEngine>, config: EngineConfig) -> TaskEngine {
        let storage = Arc::new(MemoryStorage::new());
        let sessions = Arc::new(SessionRegistry::new(
            mock.clone(),
            storage.clone(),
            Duration::from_secs(3600),
        ));
        let dispatcher = Arc::new(ServiceRegistry::with_builtin(mock));
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        TaskEngine::new(
            dispatcher,
            sessions,
            ToolExecutor::new(registry, 10),
            TaskStore::new(storage),
            Arc::new(EventBroadcaster::new()),
            config,
        )
    }

    #[tokio::test]
    async fn test_tool_only_task_completes() {
        let engine = engine_with(Arc::new(MockEngine::new()), EngineConfig::default());
        let task = engine
            .submit("u1", vec![tool_step("a"), tool_step("b")])
            .await;
        let done = engine.execute(&task.run_id).await.unwrap();

        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.final_result.as_deref(), Some("b"));
        assert_eq!(done.steps[0].result.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_task() {
        let engine = engine_with(Arc::new(MockEngine::new()), EngineConfig::default());
        let task = engine
            .submit(
                "u1",
                vec![StepSpec {
                    action: StepAction::Tool {
                        name: "missing".to_string(),
                    },
                    params: serde_json::json!({}),
                    thought: None,
                }],
            )
            .await;
        let done = engine.execute(&task.run_id).await.unwrap();

        assert_eq!(done.status, TaskStatus::Failed);
        assert!(done.error.as_deref().unwrap_or("").contains("missing"));
    }

    #[tokio::test]
    async fn test_invalid_resume_index() {
        let engine = engine_with(Arc::new(MockEngine::new()), EngineConfig::default());
        let task = engine.submit("u1", vec![tool_step("a")]).await;
        let err = engine.resume(&task.run_id, Some(5)).await.unwrap_err();
        assert!(matches!(err, ElchError::InvalidResume { requested: 5, .. }));
    }

    #[tokio::test]
    async fn test_task_not_found() {
        let engine = engine_with(Arc::new(MockEngine::new()), EngineConfig::default());
        let err = engine.execute("run_nope").await.unwrap_err();
        assert!(matches!(err, ElchError::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn test_deadline_pauses() {
        let config = EngineConfig {
            task_deadline: Duration::from_millis(0),
            ..EngineConfig::default()
        };
        let engine = engine_with(Arc::new(MockEngine::new()), config);
        let task = engine.submit("u1", vec![tool_step("a")]).await;
        let paused = engine.execute(&task.run_id).await.unwrap();

        assert_eq!(paused.status, TaskStatus::Paused);
        assert_eq!(paused.current_step, 0);
        assert!(paused.steps[0].result.is_none());
    }
}
