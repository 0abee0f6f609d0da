//! Mock 语言理解客户端（测试用）
//!
//! 关键词分类 + 预置回答，不发网络请求；可注入延迟模拟慢端点。

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{IntentLabel, LanguageClient};

/// Mock 实现：关键词分类，回答查预置表，槽位补全查预置表
pub struct MockLanguageClient {
    /// 每次调用前睡眠，模拟慢端点（超时测试用）
    delay: Option<Duration>,
    /// 预置回答：问题子串 -> 回答
    answers: Mutex<HashMap<String, String>>,
    /// 预置槽位补全结果
    slots: Mutex<HashMap<String, String>>,
}

impl MockLanguageClient {
    pub fn new() -> Self {
        let mut answers = HashMap::new();
        answers.insert(
            "capital of france".to_string(),
            "The capital of France is Paris.".to_string(),
        );
        Self {
            delay: None,
            answers: Mutex::new(answers),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_answer(&self, question_part: &str, answer: &str) {
        if let Ok(mut answers) = self.answers.lock() {
            answers.insert(question_part.to_lowercase(), answer.to_string());
        }
    }

    pub fn set_slot(&self, slot: &str, value: &str) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.insert(slot.to_string(), value.to_string());
        }
    }

    async fn maybe_sleep(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for MockLanguageClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageClient for MockLanguageClient {
    async fn classify(
        &self,
        text: &str,
        _context: &[String],
    ) -> Result<(IntentLabel, f32), String> {
        self.maybe_sleep().await;
        let lower = text.to_lowercase();
        let service_words = ["email", "send", "call", "message", "post", "login"];
        let question_words = ["what", "who", "when", "where", "why", "how", "?"];

        if service_words.iter().any(|w| lower.contains(w)) {
            Ok((IntentLabel::Service, 0.9))
        } else if question_words.iter().any(|w| lower.contains(w)) {
            Ok((IntentLabel::General, 0.9))
        } else {
            Ok((IntentLabel::Task, 0.6))
        }
    }

    async fn answer(&self, text: &str, _context: &[String]) -> Result<String, String> {
        self.maybe_sleep().await;
        let lower = text.to_lowercase();
        let answers = self
            .answers
            .lock()
            .map_err(|_| "answers lock poisoned".to_string())?;
        for (part, answer) in answers.iter() {
            if lower.contains(part) {
                return Ok(answer.clone());
            }
        }
        Ok("I don't have an answer for that.".to_string())
    }

    async fn extract_slots(
        &self,
        _text: &str,
        slots: &[&str],
    ) -> Result<HashMap<String, String>, String> {
        self.maybe_sleep().await;
        let preset = self
            .slots
            .lock()
            .map_err(|_| "slots lock poisoned".to_string())?;
        let mut out = HashMap::new();
        for slot in slots {
            if let Some(v) = preset.get(*slot) {
                out.insert(slot.to_string(), v.clone());
            }
        }
        Ok(out)
    }
}
