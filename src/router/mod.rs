//! 请求路由
//!
//! 先确定性解析（关键词 + 正则），解析不出来再走 LLM 分类；
//! 分类超时或响应异常一律回退为 task。

mod intent;
mod parser;

pub use intent::{IntentRouter, RequestKind, ServiceRequest};
pub use parser::{ParsedRequest, RequestParser};
pub use parser::{CHECK_LOGIN, COMPOSE_POST, NAVIGATE, SEND_MESSAGE, START_CALL};
