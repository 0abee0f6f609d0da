//! 服务调度器
//!
//! 把 (service, action, params) 路由到具体连接器；连接器负责 locate → act → verify，
//! 无论成败都要把会话留在可复用状态。效果无法确认返回 Unverified，与成功和失败三分。

mod gmail;
mod outlook;
mod skype;

pub use gmail::GmailConnector;
pub use outlook::OutlookConnector;
pub use skype::SkypeConnector;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::automation::{ActionKind, AutomationEngine, SelectorSet};
use crate::error::ElchError;
use crate::session::SessionHandle;

/// 连接器能力
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    SendMessage,
    StartCall,
    Navigate,
    CheckLogin,
    ComposePost,
}

impl Capability {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "send_message" => Some(Self::SendMessage),
            "start_call" => Some(Self::StartCall),
            "navigate" => Some(Self::Navigate),
            "check_login" => Some(Self::CheckLogin),
            "compose_post" => Some(Self::ComposePost),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendMessage => "send_message",
            Self::StartCall => "start_call",
            Self::Navigate => "navigate",
            Self::CheckLogin => "check_login",
            Self::ComposePost => "compose_post",
        }
    }
}

/// 调度结果：成功（已确认）或已执行但未确认
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Success(String),
    Unverified(String),
}

/// 服务连接器 trait
#[async_trait]
pub trait ServiceConnector: Send + Sync {
    fn service(&self) -> &str;

    fn capabilities(&self) -> &[Capability];

    /// 服务首页 URL（navigate 的默认目标，也是 URL 校验依据）
    fn home_url(&self) -> &str;

    async fn dispatch(
        &self,
        capability: Capability,
        params: &Value,
        handle: &SessionHandle,
        engine: &dyn AutomationEngine,
    ) -> Result<DispatchOutcome, ElchError>;
}

/// 连接器注册表
pub struct ServiceRegistry {
    connectors: HashMap<String, Arc<dyn ServiceConnector>>,
    engine: Arc<dyn AutomationEngine>,
}

impl ServiceRegistry {
    pub fn new(engine: Arc<dyn AutomationEngine>) -> Self {
        Self {
            connectors: HashMap::new(),
            engine,
        }
    }

    /// 内置 Gmail / Skype / Outlook 连接器
    pub fn with_builtin(engine: Arc<dyn AutomationEngine>) -> Self {
        let mut registry = Self::new(engine);
        registry.register(GmailConnector);
        registry.register(SkypeConnector);
        registry.register(OutlookConnector);
        registry
    }

    pub fn register(&mut self, connector: impl ServiceConnector + 'static) {
        self.connectors
            .insert(connector.service().to_string(), Arc::new(connector));
    }

    pub fn supported_services(&self) -> Vec<String> {
        self.connectors.keys().cloned().collect()
    }

    /// 调度动作；会话被强制关闭时随时中止并返回 SessionTerminated
    pub async fn dispatch(
        &self,
        service: &str,
        action: &str,
        params: &Value,
        handle: &SessionHandle,
    ) -> Result<DispatchOutcome, ElchError> {
        let connector = self.connectors.get(service).ok_or_else(|| {
            ElchError::UnsupportedAction {
                service: service.to_string(),
                action: action.to_string(),
                supported: Vec::new(),
            }
        })?;

        let capability = Capability::parse(action)
            .filter(|c| connector.capabilities().contains(c))
            .ok_or_else(|| ElchError::UnsupportedAction {
                service: service.to_string(),
                action: action.to_string(),
                supported: connector
                    .capabilities()
                    .iter()
                    .map(|c| c.as_str().to_string())
                    .collect(),
            })?;

        if handle.terminated() {
            return Err(ElchError::SessionTerminated {
                service: handle.key.service.clone(),
                profile: handle.key.profile.clone(),
            });
        }

        tracing::info!(service, action, "dispatch");

        tokio::select! {
            _ = handle.cancelled() => Err(ElchError::SessionTerminated {
                service: handle.key.service.clone(),
                profile: handle.key.profile.clone(),
            }),
            result = connector.dispatch(capability, params, handle, self.engine.as_ref()) => result,
        }
    }
}

/// 定位并点击，错误转 ActionFailed
pub(crate) async fn click(
    engine: &dyn AutomationEngine,
    context: &str,
    selectors: &SelectorSet,
) -> Result<(), ElchError> {
    let element = engine
        .locate(context, selectors)
        .await
        .map_err(ElchError::ActionFailed)?;
    engine
        .act(&element, ActionKind::Click, None)
        .await
        .map_err(ElchError::ActionFailed)
}

/// 定位、清空并填入文本
pub(crate) async fn fill(
    engine: &dyn AutomationEngine,
    context: &str,
    selectors: &SelectorSet,
    text: &str,
) -> Result<(), ElchError> {
    let element = engine
        .locate(context, selectors)
        .await
        .map_err(ElchError::ActionFailed)?;
    engine
        .act(&element, ActionKind::Clear, None)
        .await
        .map_err(ElchError::ActionFailed)?;
    engine
        .act(&element, ActionKind::Fill, Some(text))
        .await
        .map_err(ElchError::ActionFailed)
}

pub(crate) fn str_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

pub(crate) fn require_param<'a>(params: &'a Value, key: &str) -> Result<&'a str, ElchError> {
    str_param(params, key).ok_or_else(|| ElchError::ActionFailed(format!("Missing parameter: {key}")))
}

/// navigate 能力的通用实现：目标为 params.url 或服务首页，导航后按 URL 校验
pub(crate) async fn navigate_and_verify(
    engine: &dyn AutomationEngine,
    handle: &SessionHandle,
    params: &Value,
    home_url: &str,
    domain: &str,
) -> Result<DispatchOutcome, ElchError> {
    let url = str_param(params, "url").unwrap_or(home_url);
    engine
        .navigate(&handle.context, url)
        .await
        .map_err(ElchError::ActionFailed)?;

    let state = engine
        .read_state(&handle.context)
        .await
        .map_err(ElchError::ActionFailed)?;
    if state.url.contains(domain) {
        Ok(DispatchOutcome::Success(format!("Navigated to {}", state.url)))
    } else {
        Ok(DispatchOutcome::Unverified(format!(
            "Navigation target not confirmed, current url: {}",
            state.url
        )))
    }
}

/// check_login 能力的通用实现：读快照并打分，结果以 JSON 返回
pub(crate) async fn check_login_outcome(
    engine: &dyn AutomationEngine,
    handle: &SessionHandle,
    service: &str,
) -> Result<DispatchOutcome, ElchError> {
    let state = engine
        .read_state(&handle.context)
        .await
        .map_err(ElchError::ActionFailed)?;
    let status = crate::session::score_login(service, &state);
    let report = serde_json::json!({
        "service": service,
        "logged_in": status.logged_in,
        "confidence": status.confidence,
    });
    Ok(DispatchOutcome::Success(report.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::MockEngine;
    use crate::session::SessionRegistry;
    use crate::storage::MemoryStorage;
    use std::time::Duration;

    async fn setup() -> (Arc<MockEngine>, ServiceRegistry, SessionHandle) {
        let engine = Arc::new(MockEngine::new());
        let sessions = SessionRegistry::new(
            engine.clone(),
            Arc::new(MemoryStorage::new()),
            Duration::from_secs(3600),
        );
        let handle = sessions.acquire("gmail", "p1", false).await.unwrap();
        let registry = ServiceRegistry::with_builtin(engine.clone());
        (engine, registry, handle)
    }

    #[tokio::test]
    async fn test_unknown_service() {
        let (_, registry, handle) = setup().await;
        let err = registry
            .dispatch("myspace", "send_message", &serde_json::json!({}), &handle)
            .await
            .unwrap_err();
        assert!(matches!(err, ElchError::UnsupportedAction { .. }));
    }

    #[tokio::test]
    async fn test_unsupported_action_names_supported_set() {
        let (_, registry, handle) = setup().await;
        let err = registry
            .dispatch("gmail", "start_call", &serde_json::json!({}), &handle)
            .await
            .unwrap_err();
        match err {
            ElchError::UnsupportedAction { supported, .. } => {
                assert!(supported.contains(&"send_message".to_string()));
                assert!(!supported.contains(&"start_call".to_string()));
            }
            other => panic!("expected unsupported action, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_navigate_verified_by_url() {
        let (engine, registry, handle) = setup().await;
        engine.set_default_state(MockEngine::state("https://mail.google.com/mail", &["inbox"]));

        let outcome = registry
            .dispatch("gmail", "navigate", &serde_json::json!({}), &handle)
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Success(_)));
    }

    #[tokio::test]
    async fn test_check_login_reports_json() {
        let (engine, registry, handle) = setup().await;
        engine.set_default_state(MockEngine::state(
            "https://mail.google.com/mail",
            &["compose", "inbox"],
        ));

        let outcome = registry
            .dispatch("gmail", "check_login", &serde_json::json!({}), &handle)
            .await
            .unwrap();
        match outcome {
            DispatchOutcome::Success(report) => {
                let v: serde_json::Value = serde_json::from_str(&report).unwrap();
                assert_eq!(v["logged_in"], true);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }
}
