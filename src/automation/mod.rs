//! 页面自动化引擎抽象
//!
//! AutomationEngine trait（open / navigate / locate / act / read_state / close）；
//! 启用 feature "browser" 后提供 Headless Chrome 实现，测试用脚本化 Mock。

#[cfg(feature = "browser")]
mod chrome;
mod mock;
mod traits;

#[cfg(feature = "browser")]
pub use chrome::ChromeEngine;
pub use mock::MockEngine;
pub use traits::{ActionKind, AutomationEngine, ElementRef, PageState, SelectorSet};
