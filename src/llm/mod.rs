//! 语言理解客户端
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LanguageClient：classify（请求分类）、
//! answer（直接回答）、extract_slots（槽位补全）。

mod mock;
mod openai;
mod traits;

pub use mock::MockLanguageClient;
pub use openai::{OpenAiLanguageClient, TokenUsage};
pub use traits::{IntentLabel, LanguageClient};
