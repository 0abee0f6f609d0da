//! 任务与步骤模型
//!
//! 状态机：Pending → Running → {Completed | Failed | Paused}，Paused 可经 resume
//! 回到 Running。步骤索引从 0 连续编号，current_step 永远不超过步骤总数。

use serde::{Deserialize, Serialize};

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// 终态不再变迁（Paused 不是终态）
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// 步骤动作：服务能力或直接工具
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    Service { service: String, action: String },
    Tool { name: String },
}

/// 单个步骤：每次尝试的记录只追加，成功结果不回滚
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub index: usize,
    pub action: StepAction,
    pub params: serde_json::Value,
    /// 计划阶段的自由文本说明
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub retries: u32,
}

/// 提交任务时的步骤描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub action: StepAction,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
}

/// 任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub run_id: String,
    pub user_id: String,
    pub steps: Vec<Step>,
    pub current_step: usize,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 毫秒时间戳
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    pub fn new(user_id: &str, specs: Vec<StepSpec>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        let steps = specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| Step {
                index,
                action: spec.action,
                params: spec.params,
                thought: spec.thought,
                result: None,
                error: None,
                retries: 0,
            })
            .collect();
        Self {
            run_id: format!("run_{}", uuid::Uuid::new_v4()),
            user_id: user_id.to_string(),
            steps,
            current_step: 0,
            status: TaskStatus::Pending,
            final_result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    /// 从第 k 步重置：k 之后的步骤清空尝试记录，k 之前的结果保持不动
    pub fn reset_from(&mut self, k: usize) {
        for step in self.steps.iter_mut().skip(k) {
            step.result = None;
            step.error = None;
            step.retries = 0;
        }
        self.current_step = k;
        self.final_result = None;
        self.error = None;
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_step_task() -> Task {
        let specs = (0..3)
            .map(|i| StepSpec {
                action: StepAction::Tool {
                    name: "echo".to_string(),
                },
                params: serde_json::json!({"text": format!("s{i}")}),
                thought: None,
            })
            .collect();
        Task::new("u1", specs)
    }

    #[test]
    fn test_new_task_shape() {
        let task = three_step_task();
        assert!(task.run_id.starts_with("run_"));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.current_step, 0);
        let indices: Vec<usize> = task.steps.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_reset_preserves_earlier_results() {
        let mut task = three_step_task();
        task.steps[0].result = Some("done".to_string());
        task.steps[1].result = Some("done".to_string());
        task.steps[1].retries = 2;
        task.current_step = 2;

        task.reset_from(1);
        assert_eq!(task.current_step, 1);
        assert_eq!(task.steps[0].result.as_deref(), Some("done"));
        assert!(task.steps[1].result.is_none());
        assert_eq!(task.steps[1].retries, 0);
    }

    #[test]
    fn test_serde_round_trip() {
        let task = three_step_task();
        let json = serde_json::to_string(&task).unwrap();
        let restored: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.run_id, task.run_id);
        assert_eq!(restored.steps.len(), 3);
        assert!(matches!(restored.steps[0].action, StepAction::Tool { .. }));
    }
}
