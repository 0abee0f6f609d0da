//! Headless Chrome 引擎
//!
//! 需启用 feature "browser" 且系统已安装 Chrome/Chromium。
//! 每个上下文对应一个 Tab；headless_chrome 的 API 是阻塞的，所有调用经
//! spawn_blocking 进入阻塞线程池。

#![cfg(feature = "browser")]

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use headless_chrome::{Browser, Tab};

use crate::automation::{ActionKind, AutomationEngine, ElementRef, PageState, SelectorSet};

/// Chrome 实现：惰性启动浏览器，上下文映射到 Tab
pub struct ChromeEngine {
    browser: Arc<RwLock<Option<Browser>>>,
    tabs: Arc<RwLock<HashMap<String, Arc<Tab>>>>,
    /// 标记探针：(标记名, CSS 选择器)；read_state 逐个探测命中的标记
    marker_probes: Vec<(String, String)>,
}

impl ChromeEngine {
    pub fn new(marker_probes: Vec<(String, String)>) -> Self {
        Self {
            browser: Arc::new(RwLock::new(None)),
            tabs: Arc::new(RwLock::new(HashMap::new())),
            marker_probes,
        }
    }

    fn tab(&self, context: &str) -> Result<Arc<Tab>, String> {
        let tabs = self.tabs.read().map_err(|e| e.to_string())?;
        tabs.get(context)
            .cloned()
            .ok_or_else(|| format!("Unknown context: {context}"))
    }
}

#[async_trait]
impl AutomationEngine for ChromeEngine {
    async fn open(&self, profile: &str) -> Result<String, String> {
        let browser_arc = Arc::clone(&self.browser);
        let tabs_arc = Arc::clone(&self.tabs);
        let context = format!("ctx_{}", uuid::Uuid::new_v4());
        let context_key = context.clone();
        let profile = profile.to_string();

        tracing::info!(profile = %profile, context = %context, "chrome open context");

        tokio::task::spawn_blocking(move || {
            let mut browser_guard = browser_arc.write().map_err(|e| e.to_string())?;
            if browser_guard.is_none() {
                let browser = Browser::default()
                    .map_err(|e| format!("Chrome launch failed: {e}. Install Chrome/Chromium."))?;
                *browser_guard = Some(browser);
            }
            let browser = browser_guard
                .as_ref()
                .ok_or_else(|| "Browser not initialized".to_string())?;

            let tab = browser
                .new_tab()
                .map_err(|e| format!("Browser tab failed: {e}"))?;

            let mut tabs = tabs_arc.write().map_err(|e| e.to_string())?;
            tabs.insert(context_key, tab);
            Ok::<_, String>(())
        })
        .await
        .map_err(|e| format!("Task join: {e}"))??;

        Ok(context)
    }

    async fn navigate(&self, context: &str, url: &str) -> Result<(), String> {
        let tab = self.tab(context)?;
        let url = url.to_string();

        tokio::task::spawn_blocking(move || {
            tab.navigate_to(&url)
                .map_err(|e| format!("Navigate failed: {e}"))?;
            tab.wait_for_element("body")
                .map_err(|e| format!("Page load failed: {e}"))?;
            Ok::<_, String>(())
        })
        .await
        .map_err(|e| format!("Task join: {e}"))?
    }

    async fn locate(&self, context: &str, selectors: &SelectorSet) -> Result<ElementRef, String> {
        let tab = self.tab(context)?;
        let candidates = selectors.selectors.clone();
        let description = selectors.description.clone();
        let context = context.to_string();

        tokio::task::spawn_blocking(move || {
            for selector in &candidates {
                if tab.find_element(selector).is_ok() {
                    return Ok(ElementRef {
                        context,
                        selector: selector.clone(),
                    });
                }
            }
            Err(format!("Element not found: {description}"))
        })
        .await
        .map_err(|e| format!("Task join: {e}"))?
    }

    async fn act(
        &self,
        element: &ElementRef,
        action: ActionKind,
        payload: Option<&str>,
    ) -> Result<(), String> {
        let tab = self.tab(&element.context)?;
        let selector = element.selector.clone();
        let payload = payload.map(|p| p.to_string());

        tokio::task::spawn_blocking(move || {
            let el = tab
                .find_element(&selector)
                .map_err(|e| format!("Element vanished: {e}"))?;
            match action {
                ActionKind::Click => {
                    el.click().map_err(|e| format!("Click failed: {e}"))?;
                }
                ActionKind::Fill => {
                    let text = payload.unwrap_or_default();
                    el.click().map_err(|e| format!("Focus failed: {e}"))?;
                    el.type_into(&text)
                        .map_err(|e| format!("Type failed: {e}"))?;
                }
                ActionKind::Press => {
                    let key = payload.unwrap_or_else(|| "Enter".to_string());
                    el.click().map_err(|e| format!("Focus failed: {e}"))?;
                    tab.press_key(&key)
                        .map_err(|e| format!("Press failed: {e}"))?;
                }
                ActionKind::Clear => {
                    el.call_js_fn(
                        "function() { this.value = ''; this.textContent = ''; \
                         this.dispatchEvent(new Event('input', { bubbles: true })); }",
                        vec![],
                        false,
                    )
                    .map_err(|e| format!("Clear failed: {e}"))?;
                }
            }
            Ok::<_, String>(())
        })
        .await
        .map_err(|e| format!("Task join: {e}"))?
    }

    async fn read_state(&self, context: &str) -> Result<PageState, String> {
        let tab = self.tab(context)?;
        let probes = self.marker_probes.clone();

        tokio::task::spawn_blocking(move || {
            let url = tab.get_url();
            let title = tab.get_title().unwrap_or_default();

            let mut markers = Vec::new();
            for (name, selector) in &probes {
                if tab.find_element(selector).is_ok() {
                    markers.push(name.clone());
                }
            }

            let credentials = match tab.get_cookies() {
                Ok(cookies) => serde_json::to_value(&cookies)
                    .unwrap_or(serde_json::Value::Null),
                Err(_) => serde_json::Value::Null,
            };

            Ok::<_, String>(PageState {
                url,
                title,
                markers,
                credentials,
            })
        })
        .await
        .map_err(|e| format!("Task join: {e}"))?
    }

    async fn close(&self, context: &str) -> Result<(), String> {
        let tab = {
            let mut tabs = self.tabs.write().map_err(|e| e.to_string())?;
            tabs.remove(context)
        };
        if let Some(tab) = tab {
            tokio::task::spawn_blocking(move || {
                let _ = tab.close(true);
            })
            .await
            .map_err(|e| format!("Task join: {e}"))?;
        }
        Ok(())
    }
}
