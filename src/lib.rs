//! Elch - 网络服务自动化助手编排核心
//!
//! 模块划分：
//! - **assistant**: 助手门面（限流 → 路由 → 引擎的组合根）
//! - **automation**: 页面自动化引擎抽象（Headless Chrome / Mock）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **dispatcher**: 服务调度器与 Gmail / Skype / Outlook 连接器
//! - **engine**: 任务执行引擎（可恢复的多步计划）
//! - **error**: 统一错误类型
//! - **events**: 按用户的进度事件广播
//! - **limiter**: 滑动窗口限流
//! - **llm**: 语言理解客户端（分类 / 回答 / 槽位补全）
//! - **router**: 请求路由（确定性解析 + LLM 分类）
//! - **session**: 持久会话注册表（busy 标志 + FIFO 交接 + 空闲清扫）
//! - **storage**: 键值存储抽象（内存 / SQLite）
//! - **tools**: 直接工具与超时执行器

pub mod assistant;
pub mod automation;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod events;
pub mod limiter;
pub mod llm;
pub mod observability;
pub mod router;
pub mod session;
pub mod storage;
pub mod tools;

pub use assistant::{Assistant, AssistantResponse};
pub use error::ElchError;
