//! 脚本化 Mock 引擎（测试用）
//!
//! read_state 按队列弹出预置状态，队列空时返回默认状态；所有调用记录到 calls，
//! 测试可断言调用序列或断言没有发生任何浏览器操作。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::automation::{ActionKind, AutomationEngine, ElementRef, PageState, SelectorSet};

fn blank_state() -> PageState {
    PageState {
        url: "about:blank".to_string(),
        title: String::new(),
        markers: Vec::new(),
        credentials: serde_json::Value::Null,
    }
}

/// Mock 引擎：locate 总是命中首个选择器，act 总是成功
pub struct MockEngine {
    states: Mutex<VecDeque<PageState>>,
    default_state: Mutex<PageState>,
    calls: Mutex<Vec<String>>,
    next_context: AtomicU64,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(VecDeque::new()),
            default_state: Mutex::new(blank_state()),
            calls: Mutex::new(Vec::new()),
            next_context: AtomicU64::new(1),
        }
    }

    /// 入队一个状态，下一次 read_state 返回它
    pub fn push_state(&self, state: PageState) {
        if let Ok(mut states) = self.states.lock() {
            states.push_back(state);
        }
    }

    /// 设置队列耗尽后的默认状态
    pub fn set_default_state(&self, state: PageState) {
        if let Ok(mut default) = self.default_state.lock() {
            *default = state;
        }
    }

    /// 快捷构造：给定 URL 与标记名的状态
    pub fn state(url: &str, markers: &[&str]) -> PageState {
        PageState {
            url: url.to_string(),
            title: String::new(),
            markers: markers.iter().map(|m| m.to_string()).collect(),
            credentials: serde_json::json!({"mock": true}),
        }
    }

    /// 全部调用记录的快照
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AutomationEngine for MockEngine {
    async fn open(&self, profile: &str) -> Result<String, String> {
        let id = self.next_context.fetch_add(1, Ordering::Relaxed);
        let context = format!("ctx_{id}");
        self.record(format!("open:{profile}"));
        Ok(context)
    }

    async fn navigate(&self, context: &str, url: &str) -> Result<(), String> {
        self.record(format!("navigate:{context}:{url}"));
        Ok(())
    }

    async fn locate(&self, context: &str, selectors: &SelectorSet) -> Result<ElementRef, String> {
        self.record(format!("locate:{context}:{}", selectors.description));
        let selector = selectors
            .selectors
            .first()
            .cloned()
            .ok_or_else(|| format!("No selectors for {}", selectors.description))?;
        Ok(ElementRef {
            context: context.to_string(),
            selector,
        })
    }

    async fn act(
        &self,
        element: &ElementRef,
        action: ActionKind,
        payload: Option<&str>,
    ) -> Result<(), String> {
        self.record(format!(
            "act:{}:{:?}:{}",
            element.selector,
            action,
            payload.unwrap_or("")
        ));
        Ok(())
    }

    async fn read_state(&self, context: &str) -> Result<PageState, String> {
        self.record(format!("read_state:{context}"));
        let queued = self.states.lock().ok().and_then(|mut s| s.pop_front());
        match queued {
            Some(state) => Ok(state),
            None => Ok(self
                .default_state
                .lock()
                .map(|d| d.clone())
                .unwrap_or_else(|_| blank_state())),
        }
    }

    async fn close(&self, context: &str) -> Result<(), String> {
        self.record(format!("close:{context}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_queue_then_default() {
        let engine = MockEngine::new();
        engine.set_default_state(MockEngine::state("https://example.com", &["home"]));
        engine.push_state(MockEngine::state("https://example.com/login", &["signin"]));

        let ctx = engine.open("p1").await.unwrap();
        let first = engine.read_state(&ctx).await.unwrap();
        assert!(first.has_marker("signin"));

        let second = engine.read_state(&ctx).await.unwrap();
        assert!(second.has_marker("home"));
    }

    #[tokio::test]
    async fn test_records_calls() {
        let engine = MockEngine::new();
        let ctx = engine.open("p1").await.unwrap();
        engine.navigate(&ctx, "https://example.com").await.unwrap();
        let calls = engine.calls();
        assert_eq!(calls[0], "open:p1");
        assert!(calls[1].starts_with("navigate:"));
    }
}
