//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；分类与槽位补全
//! 要求模型输出 JSON，解析失败视为调用失败由上层处理。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{IntentLabel, LanguageClient};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

const CLASSIFY_SYSTEM_PROMPT: &str = "You classify user requests for a web-service assistant. \
Respond with JSON only: {\"category\": \"general\"|\"service\"|\"task\", \"confidence\": 0.0-1.0}. \
general = knowledge question answerable in text; \
service = a single action on a web service (email, call, post); \
task = multi-step automation.";

/// OpenAI 兼容客户端：持有 Client 与 model 名
pub struct OpenAiLanguageClient {
    client: Client<OpenAIConfig>,
    model: String,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiLanguageClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new()
                .with_api_base(url)
                .with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            usage: TokenUsage::new(),
        }
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, String> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system.to_string())
                    .build()
                    .map_err(|e| e.to_string())?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user.to_string())
                    .build()
                    .map_err(|e| e.to_string())?,
            ),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()
            .map_err(|e| e.to_string())?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;

        if let Some(usage) = &response.usage {
            self.usage.add(
                usage.prompt_tokens as u64,
                usage.completion_tokens as u64,
            );
        }

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(content)
    }

    fn with_context(text: &str, context: &[String]) -> String {
        if context.is_empty() {
            text.to_string()
        } else {
            format!("Recent context:\n{}\n\nRequest: {}", context.join("\n"), text)
        }
    }
}

/// 剥离模型输出中可能包裹 JSON 的 markdown 代码块
fn strip_code_fence(s: &str) -> &str {
    let s = s.trim();
    let s = s.strip_prefix("```json").unwrap_or(s);
    let s = s.strip_prefix("```").unwrap_or(s);
    s.strip_suffix("```").unwrap_or(s).trim()
}

#[async_trait]
impl LanguageClient for OpenAiLanguageClient {
    async fn classify(
        &self,
        text: &str,
        context: &[String],
    ) -> Result<(IntentLabel, f32), String> {
        let content = self
            .complete(CLASSIFY_SYSTEM_PROMPT, &Self::with_context(text, context))
            .await?;

        let value: serde_json::Value = serde_json::from_str(strip_code_fence(&content))
            .map_err(|e| format!("Malformed classification response: {e}"))?;

        let label = value
            .get("category")
            .and_then(|c| c.as_str())
            .and_then(IntentLabel::parse)
            .ok_or_else(|| format!("Unknown category in response: {content}"))?;
        let confidence = value
            .get("confidence")
            .and_then(|c| c.as_f64())
            .unwrap_or(0.5) as f32;

        Ok((label, confidence.clamp(0.0, 1.0)))
    }

    async fn answer(&self, text: &str, context: &[String]) -> Result<String, String> {
        self.complete(
            "You are a helpful assistant. Answer the user's question concisely.",
            &Self::with_context(text, context),
        )
        .await
    }

    async fn extract_slots(
        &self,
        text: &str,
        slots: &[&str],
    ) -> Result<HashMap<String, String>, String> {
        let system = format!(
            "Extract the following fields from the user's request: {}. \
Respond with a JSON object containing only the fields whose values appear \
explicitly in the text. Never guess or invent a value.",
            slots.join(", ")
        );
        let content = self.complete(&system, text).await?;

        let value: serde_json::Value = serde_json::from_str(strip_code_fence(&content))
            .map_err(|e| format!("Malformed slot response: {e}"))?;
        let object = value
            .as_object()
            .ok_or_else(|| format!("Slot response is not an object: {content}"))?;

        let mut out = HashMap::new();
        for slot in slots {
            if let Some(v) = object.get(*slot).and_then(|v| v.as_str()) {
                if !v.trim().is_empty() {
                    out.insert(slot.to_string(), v.trim().to_string());
                }
            }
        }
        Ok(out)
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}
