//! 助手门面
//!
//! 入站请求的统一入口：限流 → 路由 → 执行。通用问答直接返回答案，绝不触碰会话；
//! 服务请求生成三步计划（navigate → check_login → 动作）交给引擎；复杂任务由
//! 调用方自带步骤计划提交。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::automation::AutomationEngine;
use crate::config::AppConfig;
use crate::dispatcher::ServiceRegistry;
use crate::engine::{EngineConfig, Step, StepAction, StepSpec, Task, TaskEngine, TaskStore};
use crate::error::ElchError;
use crate::events::{Event, EventBroadcaster};
use crate::limiter::{Category, CategoryLimit, RateLimiter};
use crate::llm::LanguageClient;
use crate::router::{IntentRouter, RequestKind, ServiceRequest};
use crate::session::SessionRegistry;
use crate::storage::Storage;
use crate::tools::{EchoTool, ToolExecutor, ToolRegistry};

/// 助手响应
#[derive(Debug, Clone)]
pub struct AssistantResponse {
    /// answer / needs_clarification / pending / running / paused / completed / failed
    pub status: String,
    pub message: String,
    pub run_id: Option<String>,
    pub history: Vec<Step>,
    pub final_result: Option<String>,
}

/// 助手：限流、路由、会话、引擎与事件的组合根
pub struct Assistant {
    router: IntentRouter,
    engine: Arc<TaskEngine>,
    sessions: Arc<SessionRegistry>,
    limiter: RateLimiter,
    events: Arc<EventBroadcaster>,
}

impl Assistant {
    pub fn new(
        llm: Arc<dyn LanguageClient>,
        automation: Arc<dyn AutomationEngine>,
        storage: Arc<dyn Storage>,
        config: &AppConfig,
    ) -> Self {
        let sessions = Arc::new(SessionRegistry::new(
            automation.clone(),
            storage.clone(),
            Duration::from_secs(config.sessions.idle_timeout_secs),
        ));
        let dispatcher = Arc::new(ServiceRegistry::with_builtin(automation));

        let mut tools = ToolRegistry::new();
        tools.register(EchoTool);

        let events = Arc::new(EventBroadcaster::new());
        let engine = Arc::new(TaskEngine::new(
            dispatcher,
            sessions.clone(),
            ToolExecutor::new(tools, config.engine.step_timeout_secs),
            TaskStore::new(storage),
            events.clone(),
            EngineConfig {
                max_step_retries: config.engine.max_step_retries,
                step_timeout: Duration::from_secs(config.engine.step_timeout_secs),
                task_deadline: Duration::from_secs(config.engine.task_deadline_secs),
                queue_sessions: config.sessions.queue_on_busy,
            },
        ));

        let limiter = RateLimiter::new(
            CategoryLimit {
                max_requests: config.limits.general_quota,
                window: Duration::from_secs(config.limits.general_window_secs),
            },
            CategoryLimit {
                max_requests: config.limits.task_quota,
                window: Duration::from_secs(config.limits.task_window_secs),
            },
        );

        Self {
            router: IntentRouter::new(llm, Duration::from_secs(config.llm.classify_timeout_secs)),
            engine,
            sessions,
            limiter,
            events,
        }
    }

    /// 统一请求入口；带 run_id 的请求是恢复，其余先分类再处理
    pub async fn handle_request(
        &self,
        user_id: &str,
        text: &str,
        run_id: Option<&str>,
        resume_from: Option<usize>,
    ) -> Result<AssistantResponse, ElchError> {
        if let Some(run_id) = run_id {
            self.admit(user_id, Category::Task)?;
            let task = self.engine.resume(run_id, resume_from).await?;
            return Ok(Self::task_response(&task));
        }

        match self.router.classify(text, &[]).await {
            RequestKind::General { answer } => {
                self.admit(user_id, Category::General)?;
                self.events.publish(
                    user_id,
                    "chat",
                    serde_json::json!({"question": text, "answer": answer}),
                );
                Ok(AssistantResponse {
                    status: "answer".to_string(),
                    message: answer,
                    run_id: None,
                    history: Vec::new(),
                    final_result: None,
                })
            }
            RequestKind::Service(request) => {
                self.admit(user_id, Category::Task)?;
                let specs = Self::service_plan(&request);
                let task = self.engine.submit(user_id, specs).await;
                let task = self.engine.execute(&task.run_id).await?;
                Ok(Self::task_response(&task))
            }
            RequestKind::Task => {
                self.admit(user_id, Category::Task)?;
                Ok(AssistantResponse {
                    status: "task".to_string(),
                    message: "This looks like a multi-step task. Submit a step plan to run it."
                        .to_string(),
                    run_id: None,
                    history: Vec::new(),
                    final_result: None,
                })
            }
            RequestKind::NeedsClarification {
                service,
                action,
                missing,
            } => Ok(AssistantResponse {
                status: "needs_clarification".to_string(),
                message: format!(
                    "To {action} on {service} I still need: {}",
                    missing.join(", ")
                ),
                run_id: None,
                history: Vec::new(),
                final_result: None,
            }),
        }
    }

    /// 提交并执行调用方自带的步骤计划
    pub async fn submit_plan(
        &self,
        user_id: &str,
        specs: Vec<StepSpec>,
    ) -> Result<AssistantResponse, ElchError> {
        self.admit(user_id, Category::Task)?;
        let task = self.engine.submit(user_id, specs).await;
        let task = self.engine.execute(&task.run_id).await?;
        Ok(Self::task_response(&task))
    }

    pub async fn task_status(&self, run_id: &str) -> Option<Task> {
        self.engine.get(run_id).await
    }

    pub async fn cancel_task(&self, run_id: &str) {
        self.engine.cancel(run_id).await;
    }

    /// 订阅某用户的进度事件流
    pub fn subscribe(&self, user_id: &str) -> mpsc::UnboundedReceiver<Event> {
        self.events.subscribe(user_id)
    }

    pub fn remaining_quota(&self, user_id: &str, category: Category) -> usize {
        self.limiter.remaining(user_id, category)
    }

    /// 强制关闭匹配的会话
    pub async fn cleanup_sessions(&self, service: Option<&str>, profile: Option<&str>) -> usize {
        self.sessions.cleanup(service, profile).await
    }

    /// 启动空闲会话清扫循环
    pub fn start_session_sweeper(
        &self,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        self.sessions.clone().spawn_sweeper(interval, shutdown)
    }

    fn admit(&self, user_id: &str, category: Category) -> Result<(), ElchError> {
        if self.limiter.admit(user_id, category) {
            Ok(())
        } else {
            Err(ElchError::RateLimited {
                category: category.as_str().to_string(),
            })
        }
    }

    /// 服务请求的标准计划：打开服务、确认登录、执行动作
    fn service_plan(request: &ServiceRequest) -> Vec<StepSpec> {
        let service = &request.service;
        vec![
            StepSpec {
                action: StepAction::Service {
                    service: service.clone(),
                    action: "navigate".to_string(),
                },
                params: serde_json::json!({}),
                thought: Some(format!("Open {service}")),
            },
            StepSpec {
                action: StepAction::Service {
                    service: service.clone(),
                    action: "check_login".to_string(),
                },
                params: serde_json::json!({}),
                thought: Some(format!("Confirm {service} login state")),
            },
            StepSpec {
                action: StepAction::Service {
                    service: service.clone(),
                    action: request.action.clone(),
                },
                params: request.params.clone(),
                thought: Some(format!("Perform {} on {service}", request.action)),
            },
        ]
    }

    fn task_response(task: &Task) -> AssistantResponse {
        let message = match task.status {
            crate::engine::TaskStatus::Completed => task
                .final_result
                .clone()
                .unwrap_or_else(|| "Task completed.".to_string()),
            crate::engine::TaskStatus::Paused => {
                format!("Task paused at step {}.", task.current_step)
            }
            crate::engine::TaskStatus::Failed => task
                .error
                .clone()
                .unwrap_or_else(|| "Task failed.".to_string()),
            _ => format!("Task {} is {}.", task.run_id, task.status.as_str()),
        };
        AssistantResponse {
            status: task.status.as_str().to_string(),
            message,
            run_id: Some(task.run_id.clone()),
            history: task.steps.clone(),
            final_result: task.final_result.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::MockEngine;
    use crate::llm::MockLanguageClient;
    use crate::storage::MemoryStorage;

    fn assistant_with(engine: Arc<MockEngine>) -> Assistant {
        Assistant::new(
            Arc::new(MockLanguageClient::new()),
            engine,
            Arc::new(MemoryStorage::new()),
            &AppConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_general_question_never_touches_sessions() {
        let engine = Arc::new(MockEngine::new());
        let assistant = assistant_with(engine.clone());

        let response = assistant
            .handle_request("u1", "What is the capital of France?", None, None)
            .await
            .unwrap();

        assert_eq!(response.status, "answer");
        assert!(response.message.contains("Paris"));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_needs_clarification() {
        let engine = Arc::new(MockEngine::new());
        let assistant = assistant_with(engine);

        let response = assistant
            .handle_request("u1", "send an email about the meeting", None, None)
            .await
            .unwrap();

        assert_eq!(response.status, "needs_clarification");
        assert!(response.message.contains("to"));
    }

    #[tokio::test]
    async fn test_rate_limited_general() {
        let engine = Arc::new(MockEngine::new());
        let mut config = AppConfig::default();
        config.limits.general_quota = 1;
        let assistant = Assistant::new(
            Arc::new(MockLanguageClient::new()),
            engine,
            Arc::new(MemoryStorage::new()),
            &config,
        );

        assistant
            .handle_request("u1", "What is the capital of France?", None, None)
            .await
            .unwrap();
        let err = assistant
            .handle_request("u1", "What is the capital of France?", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ElchError::RateLimited { .. }));
    }
}
