//! 错误类型
//!
//! 全 crate 统一的错误枚举；会话、调度、引擎各自的失败形态都在这里，
//! 调用方可按变体区分可恢复（限流、会话占用、任务已在执行）与不可恢复（引擎、存储）。

use thiserror::Error;

/// 统一错误枚举
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ElchError {
    /// 会话被占用且未选择排队
    #[error("Session busy: {service}/{profile}")]
    SessionBusy { service: String, profile: String },

    /// 会话在等待或持有期间被强制关闭
    #[error("Session terminated: {service}/{profile}")]
    SessionTerminated { service: String, profile: String },

    /// 服务不支持该动作
    #[error("Service {service} does not support action {action}, supported: {supported:?}")]
    UnsupportedAction {
        service: String,
        action: String,
        supported: Vec<String>,
    },

    /// 动作已执行但无法确认效果，重试耗尽
    #[error("Action unverified after {attempts} attempts: {detail}")]
    Unverified { attempts: u32, detail: String },

    /// 触发限流
    #[error("Rate limited: {category}")]
    RateLimited { category: String },

    /// 动作执行失败（页面操作层面）
    #[error("Action failed: {0}")]
    ActionFailed(String),

    /// 未注册的工具
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// 工具执行失败
    #[error("Tool execution failed: {0}")]
    ToolFailed(String),

    /// 工具执行超时
    #[error("Tool timed out: {0}")]
    ToolTimeout(String),

    /// 任务不存在
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// 同一 run_id 已有执行方在驱动
    #[error("Task already running: {0}")]
    TaskRunning(String),

    /// 恢复起点越界
    #[error("Invalid resume step {requested}, current step is {current}")]
    InvalidResume { requested: usize, current: usize },

    /// 引擎内部错误
    #[error("Engine error: {0}")]
    Engine(String),

    /// 存储错误
    #[error("Storage error: {0}")]
    Storage(String),

    /// 任务被取消
    #[error("Cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = ElchError::SessionBusy {
            service: "gmail".to_string(),
            profile: "gmail_profile".to_string(),
        };
        assert_eq!(e.to_string(), "Session busy: gmail/gmail_profile");

        let e = ElchError::Unverified {
            attempts: 3,
            detail: "send not confirmed".to_string(),
        };
        assert!(e.to_string().contains("3 attempts"));
    }
}
