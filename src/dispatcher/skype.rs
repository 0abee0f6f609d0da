//! Skype 连接器
//!
//! send_message 与 start_call 都先搜索联系人再操作；联系人选择器带上
//! 联系人名，页面改版时回退到通用类名。

use async_trait::async_trait;
use serde_json::Value;

use crate::automation::{ActionKind, AutomationEngine, SelectorSet};
use crate::dispatcher::{
    check_login_outcome, click, fill, navigate_and_verify, require_param, str_param, Capability,
    DispatchOutcome, ServiceConnector,
};
use crate::error::ElchError;
use crate::session::SessionHandle;

const HOME_URL: &str = "https://web.skype.com";
const DOMAIN: &str = "web.skype.com";

const SEARCH: &[&str] = &[
    "[placeholder*='Search']",
    "[aria-label*='Search']",
    "input[type='search']",
];
const MESSAGE_INPUT: &[&str] = &[
    "[contenteditable='true']",
    "[role='textbox']",
    ".message-input",
    "[placeholder*='Type a message']",
];
const CALL: &[&str] = &[
    "[data-text-as-pseudo-element='Call']",
    "[aria-label*='Call']",
    "[title*='Call']",
    ".call-button",
];

fn contact_selectors(contact: &str) -> SelectorSet {
    SelectorSet {
        description: format!("contact '{contact}'"),
        selectors: vec![
            format!("[aria-label*='{contact}']"),
            format!("[data-text-as-pseudo-element*='{contact}']"),
            ".contact".to_string(),
        ],
    }
}

pub struct SkypeConnector;

impl SkypeConnector {
    async fn ensure_logged_in(
        &self,
        handle: &SessionHandle,
        engine: &dyn AutomationEngine,
    ) -> Result<(), ElchError> {
        let state = engine
            .read_state(&handle.context)
            .await
            .map_err(ElchError::ActionFailed)?;
        if state.has_marker("signin") {
            return Err(ElchError::ActionFailed(
                "Please log into Skype first. The browser will navigate to Skype - please sign in."
                    .to_string(),
            ));
        }
        Ok(())
    }

    async fn open_contact(
        &self,
        contact: &str,
        handle: &SessionHandle,
        engine: &dyn AutomationEngine,
    ) -> Result<(), ElchError> {
        let ctx = &handle.context;
        fill(engine, ctx, &SelectorSet::new("search field", SEARCH), contact).await?;
        click(engine, ctx, &contact_selectors(contact)).await
    }

    async fn send_message(
        &self,
        params: &Value,
        handle: &SessionHandle,
        engine: &dyn AutomationEngine,
    ) -> Result<DispatchOutcome, ElchError> {
        let contact = require_param(params, "contact")?;
        let message = str_param(params, "message").unwrap_or("");
        let ctx = &handle.context;

        self.ensure_logged_in(handle, engine).await?;
        self.open_contact(contact, handle, engine).await?;

        let input = SelectorSet::new("message input", MESSAGE_INPUT);
        fill(engine, ctx, &input, message).await?;
        let element = engine
            .locate(ctx, &input)
            .await
            .map_err(ElchError::ActionFailed)?;
        engine
            .act(&element, ActionKind::Press, Some("Enter"))
            .await
            .map_err(ElchError::ActionFailed)?;

        let after = engine.read_state(ctx).await.map_err(ElchError::ActionFailed)?;
        if after.has_marker("sent") {
            Ok(DispatchOutcome::Success(format!("Message sent to {contact}")))
        } else {
            Ok(DispatchOutcome::Unverified(format!(
                "Message to {contact} not confirmed"
            )))
        }
    }

    async fn start_call(
        &self,
        params: &Value,
        handle: &SessionHandle,
        engine: &dyn AutomationEngine,
    ) -> Result<DispatchOutcome, ElchError> {
        let contact = require_param(params, "contact")?;
        let ctx = &handle.context;

        self.ensure_logged_in(handle, engine).await?;
        self.open_contact(contact, handle, engine).await?;
        click(engine, ctx, &SelectorSet::new("call button", CALL)).await?;

        let after = engine.read_state(ctx).await.map_err(ElchError::ActionFailed)?;
        if after.has_marker("in_call") {
            Ok(DispatchOutcome::Success(format!("Call started with {contact}")))
        } else {
            Ok(DispatchOutcome::Unverified(format!(
                "Call with {contact} not confirmed"
            )))
        }
    }
}

#[async_trait]
impl ServiceConnector for SkypeConnector {
    fn service(&self) -> &str {
        "skype"
    }

    fn capabilities(&self) -> &[Capability] {
        &[
            Capability::SendMessage,
            Capability::StartCall,
            Capability::Navigate,
            Capability::CheckLogin,
        ]
    }

    fn home_url(&self) -> &str {
        HOME_URL
    }

    async fn dispatch(
        &self,
        capability: Capability,
        params: &Value,
        handle: &SessionHandle,
        engine: &dyn AutomationEngine,
    ) -> Result<DispatchOutcome, ElchError> {
        match capability {
            Capability::SendMessage => self.send_message(params, handle, engine).await,
            Capability::StartCall => self.start_call(params, handle, engine).await,
            Capability::Navigate => {
                navigate_and_verify(engine, handle, params, self.home_url(), DOMAIN).await
            }
            Capability::CheckLogin => check_login_outcome(engine, handle, "skype").await,
            other => Err(ElchError::UnsupportedAction {
                service: "skype".to_string(),
                action: other.as_str().to_string(),
                supported: self
                    .capabilities()
                    .iter()
                    .map(|c| c.as_str().to_string())
                    .collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::MockEngine;
    use crate::session::SessionRegistry;
    use crate::storage::MemoryStorage;
    use std::sync::Arc;
    use std::time::Duration;

    async fn handle(engine: Arc<MockEngine>) -> SessionHandle {
        let sessions = SessionRegistry::new(
            engine,
            Arc::new(MemoryStorage::new()),
            Duration::from_secs(3600),
        );
        sessions.acquire("skype", "p1", false).await.unwrap()
    }

    #[tokio::test]
    async fn test_message_verified() {
        let engine = Arc::new(MockEngine::new());
        engine.push_state(MockEngine::state("https://web.skype.com", &["chat_list"]));
        engine.push_state(MockEngine::state("https://web.skype.com", &["sent"]));

        let handle = handle(engine.clone()).await;
        let outcome = SkypeConnector
            .send_message(
                &serde_json::json!({"contact": "Alice", "message": "hi"}),
                &handle,
                engine.as_ref(),
            )
            .await
            .unwrap();

        match outcome {
            DispatchOutcome::Success(msg) => assert!(msg.contains("Alice")),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_call_unverified() {
        let engine = Arc::new(MockEngine::new());
        engine.set_default_state(MockEngine::state("https://web.skype.com", &["chat_list"]));

        let handle = handle(engine.clone()).await;
        let outcome = SkypeConnector
            .start_call(
                &serde_json::json!({"contact": "Bob"}),
                &handle,
                engine.as_ref(),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, DispatchOutcome::Unverified(_)));
    }

    #[tokio::test]
    async fn test_contact_selectors_carry_name() {
        let set = contact_selectors("Alice");
        assert!(set.selectors[0].contains("Alice"));
        assert_eq!(set.selectors.last().unwrap(), ".contact");
    }
}
