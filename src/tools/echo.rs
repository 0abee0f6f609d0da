//! Echo 工具：原样返回 text 参数，任务拼装与测试用

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::Tool;

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Returns the given text unchanged. Args: {\"text\": \"...\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let text = args
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "Missing text".to_string())?;
        Ok(text.to_string())
    }
}
