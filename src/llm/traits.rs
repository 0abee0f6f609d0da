//! 语言理解客户端抽象

use std::collections::HashMap;

use async_trait::async_trait;

/// 分类标签：通用问答 / 服务动作 / 自动化任务
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentLabel {
    General,
    Service,
    Task,
}

impl IntentLabel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "general" => Some(Self::General),
            "service" => Some(Self::Service),
            "task" => Some(Self::Task),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Service => "service",
            Self::Task => "task",
        }
    }
}

/// 语言理解 trait：分类、直接回答、槽位补全
#[async_trait]
pub trait LanguageClient: Send + Sync {
    /// 对请求文本分类，返回标签与置信度 [0,1]
    async fn classify(
        &self,
        text: &str,
        context: &[String],
    ) -> Result<(IntentLabel, f32), String>;

    /// 对通用问题生成回答
    async fn answer(&self, text: &str, context: &[String]) -> Result<String, String>;

    /// 从文本中补全指定槽位；无法确定的槽位不出现在结果中，不允许猜测
    async fn extract_slots(
        &self,
        text: &str,
        slots: &[&str],
    ) -> Result<HashMap<String, String>, String>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
