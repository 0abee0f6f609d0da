//! 自动化引擎抽象
//!
//! 引擎以浏览器上下文（context）为单位工作：open 建上下文，navigate/locate/act/read_state
//! 在上下文内操作，close 销毁。选择器用回退列表描述，页面改版时逐个尝试。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 选择器回退列表：按顺序尝试，首个命中的生效
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorSet {
    /// 人类可读说明（报错时引用）
    pub description: String,
    pub selectors: Vec<String>,
}

impl SelectorSet {
    pub fn new(description: &str, selectors: &[&str]) -> Self {
        Self {
            description: description.to_string(),
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// 已定位元素的引用
#[derive(Debug, Clone)]
pub struct ElementRef {
    pub context: String,
    pub selector: String,
}

/// 对元素可执行的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Click,
    /// 填入文本（payload 为内容）
    Fill,
    /// 按键（payload 为键名，如 "Enter"）
    Press,
    Clear,
}

/// 页面状态快照：登录判定与动作校验的依据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageState {
    pub url: String,
    pub title: String,
    /// 页面上命中的标记名（如 "compose"、"signin"、"sent"）
    pub markers: Vec<String>,
    /// 不透明凭据快照（cookies 等），只由会话注册表持有
    pub credentials: serde_json::Value,
}

impl PageState {
    pub fn has_marker(&self, name: &str) -> bool {
        self.markers.iter().any(|m| m == name)
    }
}

/// 自动化引擎 trait：所有操作返回 Result<_, String>，由调用方决定错误语义
#[async_trait]
pub trait AutomationEngine: Send + Sync {
    /// 打开一个浏览器上下文，profile 决定凭据隔离域；返回上下文 ID
    async fn open(&self, profile: &str) -> Result<String, String>;

    async fn navigate(&self, context: &str, url: &str) -> Result<(), String>;

    /// 按回退列表定位元素，全部未命中则 Err
    async fn locate(&self, context: &str, selectors: &SelectorSet) -> Result<ElementRef, String>;

    async fn act(
        &self,
        element: &ElementRef,
        action: ActionKind,
        payload: Option<&str>,
    ) -> Result<(), String>;

    async fn read_state(&self, context: &str) -> Result<PageState, String>;

    async fn close(&self, context: &str) -> Result<(), String>;
}
