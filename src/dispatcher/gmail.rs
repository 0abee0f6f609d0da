//! Gmail 连接器
//!
//! send_message 走网页版撰写流程：撰写 → 填收件人/抄送/密送/主题/正文 → 发送 →
//! 校验发送确认标记。未确认时尽力丢弃半开的撰写窗口再返回 Unverified。

use async_trait::async_trait;
use serde_json::Value;

use crate::automation::{AutomationEngine, SelectorSet};
use crate::dispatcher::{
    check_login_outcome, click, fill, navigate_and_verify, require_param, str_param, Capability,
    DispatchOutcome, ServiceConnector,
};
use crate::error::ElchError;
use crate::session::SessionHandle;

const HOME_URL: &str = "https://mail.google.com";
const DOMAIN: &str = "mail.google.com";

const COMPOSE: &[&str] = &[
    "[data-tooltip*='Compose']",
    "[aria-label*='Compose']",
    ".T-I.T-I-KE.L3",
    "[role='button'][aria-label*='Compose']",
];
const TO: &[&str] = &[
    "textarea[aria-label*='To']",
    "input[aria-label*='To']",
    "[role='combobox'][aria-label*='To']",
];
const CC: &[&str] = &["[aria-label*='Cc']", "input[aria-label*='Cc']"];
const BCC: &[&str] = &["[aria-label*='Bcc']", "input[aria-label*='Bcc']"];
const SUBJECT: &[&str] = &[
    "input[aria-label*='Subject']",
    "input[placeholder*='Subject']",
    "[role='textbox'][aria-label*='Subject']",
];
const BODY: &[&str] = &[
    "div[aria-label*='Message Body']",
    "div[role='textbox'][aria-label*='Message Body']",
    ".Am",
    "[contenteditable='true']",
];
const SEND: &[&str] = &[
    "[data-tooltip*='Send']",
    "[aria-label*='Send']",
    "[role='button'][aria-label*='Send']",
];
const DISCARD: &[&str] = &[
    "[aria-label*='Discard draft']",
    "[data-tooltip*='Discard draft']",
];

pub struct GmailConnector;

impl GmailConnector {
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
                "Please log into Gmail first. The browser will navigate to Gmail - please sign in."
                    .to_string(),
            ));
        }

        click(engine, ctx, &SelectorSet::new("compose button", COMPOSE)).await?;
        fill(engine, ctx, &SelectorSet::new("recipient field", TO), to).await?;

        if let Some(cc) = str_param(params, "cc") {
            fill(engine, ctx, &SelectorSet::new("cc field", CC), cc).await?;
        }
        if let Some(bcc) = str_param(params, "bcc") {
            fill(engine, ctx, &SelectorSet::new("bcc field", BCC), bcc).await?;
        }
        if let Some(subject) = str_param(params, "subject") {
            fill(engine, ctx, &SelectorSet::new("subject field", SUBJECT), subject).await?;
        }
        if let Some(body) = str_param(params, "body") {
            fill(engine, ctx, &SelectorSet::new("message body", BODY), body).await?;
        }

        click(engine, ctx, &SelectorSet::new("send button", SEND)).await?;

        // 发送确认
        let after = engine.read_state(ctx).await.map_err(ElchError::ActionFailed)?;
        if after.has_marker("sent") {
            Ok(DispatchOutcome::Success(format!(
                "Email sent successfully to {to}"
            )))
        } else {
            // 半开的撰写窗口会卡住下一次操作，尽力丢弃
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
impl ServiceConnector for GmailConnector {
    fn service(&self) -> &str {
        "gmail"
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
            Capability::CheckLogin => check_login_outcome(engine, handle, "gmail").await,
            other => Err(ElchError::UnsupportedAction {
                service: "gmail".to_string(),
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
