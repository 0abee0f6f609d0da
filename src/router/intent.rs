//! 意图路由器
//!
//! classify 流程：
//! 1. 确定性解析命中服务 → 校验必填槽位 → 缺失则请 LLM 补全 → 仍缺失则 NeedsClarification
//! 2. 未命中服务 → 限时 LLM 分类 → general 顺带取回答；超时或响应异常回退 task

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::llm::{IntentLabel, LanguageClient};
use crate::router::parser::{ParsedRequest, RequestParser};

/// 分类结果
#[derive(Debug, Clone)]
pub enum RequestKind {
    /// 通用问答，附带现成回答，调用方不必再碰会话
    General { answer: String },
    /// 单个服务动作
    Service(ServiceRequest),
    /// 多步自动化任务
    Task,
    /// 必填槽位缺失，需要用户补充
    NeedsClarification {
        service: String,
        action: String,
        missing: Vec<String>,
    },
}

/// 服务动作请求
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    pub service: String,
    pub action: String,
    pub params: serde_json::Value,
}

/// 意图路由器
pub struct IntentRouter {
    llm: Arc<dyn LanguageClient>,
    parser: RequestParser,
    classify_timeout: Duration,
}

impl IntentRouter {
    pub fn new(llm: Arc<dyn LanguageClient>, classify_timeout: Duration) -> Self {
        Self {
            llm,
            parser: RequestParser::new(),
            classify_timeout,
        }
    }

    pub async fn classify(&self, text: &str, context: &[String]) -> RequestKind {
        if let Some(parsed) = self.parser.parse(text) {
            return self.resolve_service_request(text, parsed).await;
        }
        self.classify_with_llm(text, context).await
    }

    /// 确定性命中后补齐槽位；缺失的必填槽位绝不猜测
    async fn resolve_service_request(&self, text: &str, parsed: ParsedRequest) -> RequestKind {
        let ParsedRequest {
            service,
            action,
            mut slots,
        } = parsed;

        let mut missing = RequestParser::missing_slots(&service, &action, &slots);
        if !missing.is_empty() {
            let wanted: Vec<&str> = missing.iter().map(|s| s.as_str()).collect();
            match timeout(self.classify_timeout, self.llm.extract_slots(text, &wanted)).await {
                Ok(Ok(filled)) => {
                    for (k, v) in filled {
                        slots.entry(k).or_insert(v);
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "slot extraction failed");
                }
                Err(_) => {
                    tracing::warn!("slot extraction timed out");
                }
            }
            missing = RequestParser::missing_slots(&service, &action, &slots);
        }

        if !missing.is_empty() {
            return RequestKind::NeedsClarification {
                service,
                action,
                missing,
            };
        }

        RequestKind::Service(ServiceRequest {
            service,
            action,
            params: slots_to_params(slots),
        })
    }

    /// 没有服务命中时的 LLM 分类；失败一律回退 task
    async fn classify_with_llm(&self, text: &str, context: &[String]) -> RequestKind {
        let label = match timeout(self.classify_timeout, self.llm.classify(text, context)).await {
            Ok(Ok((label, confidence))) => {
                tracing::debug!(label = label.as_str(), confidence, "llm classification");
                label
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "classification failed, falling back to task");
                IntentLabel::Task
            }
            Err(_) => {
                tracing::warn!("classification timed out, falling back to task");
                IntentLabel::Task
            }
        };

        match label {
            IntentLabel::General => {
                let answer = match timeout(self.classify_timeout, self.llm.answer(text, context))
                    .await
                {
                    Ok(Ok(answer)) => answer,
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "answer generation failed");
                        "Sorry, I couldn't come up with an answer right now.".to_string()
                    }
                    Err(_) => {
                        "Sorry, I couldn't come up with an answer right now.".to_string()
                    }
                };
                RequestKind::General { answer }
            }
            // 分类器拿不准的服务请求也走任务通道，由引擎逐步处理
            IntentLabel::Service | IntentLabel::Task => RequestKind::Task,
        }
    }
}

fn slots_to_params(slots: HashMap<String, String>) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = slots
        .into_iter()
        .map(|(k, v)| (k, serde_json::Value::String(v)))
        .collect();
    serde_json::Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLanguageClient;

    fn router() -> IntentRouter {
        IntentRouter::new(
            Arc::new(MockLanguageClient::new()),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_email_request_is_service() {
        let kind = router()
            .classify("Send an email to a@b.com saying hi", &[])
            .await;
        match kind {
            RequestKind::Service(req) => {
                assert_eq!(req.service, "gmail");
                assert_eq!(req.action, "send_message");
                assert_eq!(req.params["to"], "a@b.com");
                assert_eq!(req.params["body"], "hi");
            }
            other => panic!("expected service, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_general_question_gets_answer() {
        let kind = router()
            .classify("What is the capital of France?", &[])
            .await;
        match kind {
            RequestKind::General { answer } => assert!(answer.contains("Paris")),
            other => panic!("expected general, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_slot_needs_clarification() {
        let kind = router().classify("send an email about the meeting", &[]).await;
        match kind {
            RequestKind::NeedsClarification { service, missing, .. } => {
                assert_eq!(service, "gmail");
                assert_eq!(missing, vec!["to".to_string()]);
            }
            other => panic!("expected clarification, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_llm_fills_missing_slot() {
        let llm = Arc::new(MockLanguageClient::new());
        llm.set_slot("to", "carol@example.com");
        let router = IntentRouter::new(llm, Duration::from_secs(5));

        let kind = router.classify("send an email about the meeting", &[]).await;
        match kind {
            RequestKind::Service(req) => {
                assert_eq!(req.params["to"], "carol@example.com");
            }
            other => panic!("expected service, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_classification_timeout_falls_back_to_task() {
        let llm = Arc::new(
            MockLanguageClient::new().with_delay(Duration::from_millis(200)),
        );
        let router = IntentRouter::new(llm, Duration::from_millis(20));

        let kind = router.classify("organize my week", &[]).await;
        assert!(matches!(kind, RequestKind::Task));
    }
}
