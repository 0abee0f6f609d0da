//! Outlook 连接器

use async_trait::async_trait;
use serde_json::Value;

use crate::automation::{AutomationEngine, SelectorSet};
use crate::dispatcher::{
    check_login_outcome, click, fill, navigate_and_verify, require_param, str_param, Capability,
    DispatchOutcome, ServiceConnector,
};
use crate::error::ElchError;
use crate::session::SessionHandle;

const HOME_URL: &str = "https://outlook.live.com";
const DOMAIN: &str = "outlook.live.com";

const NEW_MAIL: &[&str] = &[
    "[aria-label*='New mail']",
    "[title*='New message']",
    ".ms-Button--command",
    "[data-automation-id='composeButton']",
];
const TO: &[&str] = &[
    "[aria-label*='To']",
    "input[placeholder*='To']",
    "[role='textbox'][aria-label*='To']",
];
const SUBJECT: &[&str] = &[
    "[aria-label*='Subject']",
    "input[placeholder*='Subject']",
    "[role='textbox'][aria-label*='Subject']",
];
const BODY: &[&str] = &[
    "[contenteditable='true']",
    "[role='textbox'][aria-label*='Message body']",
    ".ms-TextField-field",
];
const SEND: &[&str] = &[
    "[aria-label*='Send']",
    "[title*='Send']",
    ".ms-Button--primary",
];
const DISCARD: &[&str] = &["[aria-label*='Discard']", "[title*='Discard']"];

pub struct OutlookConnector;

impl OutlookConnector {
    async fn send_email(
        &self,
        params: &Value,
        handle: &SessionHandle,
        engine: &dyn AutomationEngine,
    ) -> Result<DispatchOutcome, ElchError> {
        let to = require_param(params, "to")?;
        let ctx = &handle.context;

        let state = engine.read_state(ctx).await.map_err(ElchError::ActionFailed)?;
        if state.has_marker("signin") {
            return Err(ElchError::ActionFailed(
                "Please log into Outlook first. The browser will navigate to Outlook - please sign in."
                    .to_string(),
            ));
        }

        click(engine, ctx, &SelectorSet::new("new mail button", NEW_MAIL)).await?;
        fill(engine, ctx, &SelectorSet::new("recipient field", TO), to).await?;

        if let Some(subject) = str_param(params, "subject") {
            fill(engine, ctx, &SelectorSet::new("subject field", SUBJECT), subject).await?;
        }
        if let Some(body) = str_param(params, "body") {
            fill(engine, ctx, &SelectorSet::new("message body", BODY), body).await?;
        }

        click(engine, ctx, &SelectorSet::new("send button", SEND)).await?;

        let after = engine.read_state(ctx).await.map_err(ElchError::ActionFailed)?;
        if after.has_marker("sent") {
            Ok(DispatchOutcome::Success(format!(
                "Email sent successfully to {to}"
            )))
        } else {
            if let Err(e) = click(engine, ctx, &SelectorSet::new("discard draft", DISCARD)).await {
                tracing::debug!(error = %e, "discard after unverified send failed");
            }
            Ok(DispatchOutcome::Unverified(format!(
                "Send to {to} not confirmed"
            )))
        }
    }
}

#[async_trait]
impl ServiceConnector for OutlookConnector {
    fn service(&self) -> &str {
        "outlook"
    }

    fn capabilities(&self) -> &[Capability] {
        &[
            Capability::SendMessage,
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
            Capability::SendMessage => self.send_email(params, handle, engine).await,
            Capability::Navigate => {
                navigate_and_verify(engine, handle, params, self.home_url(), DOMAIN).await
            }
            Capability::CheckLogin => check_login_outcome(engine, handle, "outlook").await,
            other => Err(ElchError::UnsupportedAction {
                service: "outlook".to_string(),
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

    #[tokio::test]
    async fn test_send_verified() {
        let engine = Arc::new(MockEngine::new());
        engine.push_state(MockEngine::state("https://outlook.live.com/mail", &["inbox"]));
        engine.push_state(MockEngine::state("https://outlook.live.com/mail", &["sent"]));

        let sessions = SessionRegistry::new(
            engine.clone(),
            Arc::new(MemoryStorage::new()),
            Duration::from_secs(3600),
        );
        let handle = sessions.acquire("outlook", "p1", false).await.unwrap();

        let outcome = OutlookConnector
            .send_email(
                &serde_json::json!({"to": "a@b.com", "subject": "hi"}),
                &handle,
                engine.as_ref(),
            )
            .await
            .unwrap();

        match outcome {
            DispatchOutcome::Success(msg) => assert!(msg.contains("a@b.com")),
            other => panic!("expected success, got {other:?}"),
        }
    }
}
