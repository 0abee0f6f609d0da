//! 请求解析器
//!
//! 确定性解析：服务关键词表 + 动作关键词表 + 正则槽位抽取。能看懂的典型说法
//! （"send an email to X saying Y"）不需要 LLM；解析不出来再交给分类器。

use std::collections::HashMap;

use regex::Regex;

/// 能力名：调度器支持的动作集合
pub const SEND_MESSAGE: &str = "send_message";
pub const START_CALL: &str = "start_call";
pub const NAVIGATE: &str = "navigate";
pub const CHECK_LOGIN: &str = "check_login";
pub const COMPOSE_POST: &str = "compose_post";

/// 服务关键词表：文本包含任一关键词即命中该服务
const SERVICE_PATTERNS: &[(&str, &[&str])] = &[
    ("gmail", &["gmail", "email", "mail", "google mail"]),
    ("skype", &["skype", "video call", "voice call"]),
    ("outlook", &["outlook", "hotmail", "live mail"]),
    ("slack", &["slack", "workspace"]),
    ("discord", &["discord"]),
    ("whatsapp", &["whatsapp", "text message", "sms"]),
    ("telegram", &["telegram"]),
    ("facebook", &["facebook", "messenger"]),
    ("twitter", &["twitter", "tweet"]),
    ("linkedin", &["linkedin"]),
    ("teams", &["microsoft teams", "teams"]),
];

/// 动作关键词表
const ACTION_PATTERNS: &[(&str, &[&str])] = &[
    (
        SEND_MESSAGE,
        &[
            "send email",
            "send mail",
            "write email",
            "compose email",
            "send an email",
            "send message",
            "send a message",
            "text",
            "message",
            "chat",
            "email",
        ],
    ),
    (
        START_CALL,
        &[
            "make call",
            "start call",
            "video call",
            "voice call",
            "call",
            "dial",
        ],
    ),
    (
        COMPOSE_POST,
        &["post", "share", "tweet", "update", "status"],
    ),
    (NAVIGATE, &["open", "go to", "navigate"]),
    (CHECK_LOGIN, &["logged in", "login status", "signed in"]),
];

/// 服务允许的动作
const VALID_ACTIONS: &[(&str, &[&str])] = &[
    ("gmail", &[SEND_MESSAGE, NAVIGATE, CHECK_LOGIN]),
    ("skype", &[SEND_MESSAGE, START_CALL, NAVIGATE, CHECK_LOGIN]),
    ("outlook", &[SEND_MESSAGE, NAVIGATE, CHECK_LOGIN]),
    ("slack", &[SEND_MESSAGE, NAVIGATE, CHECK_LOGIN]),
    ("discord", &[SEND_MESSAGE, START_CALL, NAVIGATE, CHECK_LOGIN]),
    ("whatsapp", &[SEND_MESSAGE, START_CALL, NAVIGATE, CHECK_LOGIN]),
    ("telegram", &[SEND_MESSAGE, NAVIGATE, CHECK_LOGIN]),
    (
        "facebook",
        &[SEND_MESSAGE, COMPOSE_POST, NAVIGATE, CHECK_LOGIN],
    ),
    ("twitter", &[COMPOSE_POST, NAVIGATE, CHECK_LOGIN]),
    (
        "linkedin",
        &[SEND_MESSAGE, COMPOSE_POST, NAVIGATE, CHECK_LOGIN],
    ),
    ("teams", &[SEND_MESSAGE, START_CALL, NAVIGATE, CHECK_LOGIN]),
];

/// 只出现服务名、没有动作词时的默认动作
const DEFAULT_ACTIONS: &[(&str, &str)] = &[
    ("gmail", SEND_MESSAGE),
    ("outlook", SEND_MESSAGE),
    ("skype", SEND_MESSAGE),
    ("slack", SEND_MESSAGE),
    ("discord", SEND_MESSAGE),
    ("whatsapp", SEND_MESSAGE),
    ("telegram", SEND_MESSAGE),
    ("facebook", COMPOSE_POST),
    ("twitter", COMPOSE_POST),
    ("linkedin", COMPOSE_POST),
    ("teams", SEND_MESSAGE),
];

const ACTION_WORDS: &[&str] = &[
    "send", "make", "start", "call", "text", "message", "email", "mail", "post", "share",
    "tweet", "open", "navigate",
];

/// 邮件类服务：收件人槽位是邮箱地址而非联系人名
const EMAIL_SERVICES: &[&str] = &["gmail", "outlook"];

/// 解析结果：服务、动作与抽到的槽位
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub service: String,
    pub action: String,
    pub slots: HashMap<String, String>,
}

/// 确定性解析器：关键词表 + 正则
pub struct RequestParser {
    email_re: Regex,
    subject_res: Vec<Regex>,
    body_res: Vec<Regex>,
    cc_re: Regex,
    bcc_re: Regex,
    contact_res: Vec<Regex>,
    content_res: Vec<Regex>,
}

impl RequestParser {
    pub fn new() -> Self {
        // 模式均为静态常量，编译失败属编程错误
        let compile = |p: &str| Regex::new(p).unwrap();
        Self {
            email_re: compile(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}"),
            subject_res: vec![
                compile(r#"(?i)subject:\s*["']([^"']+)["']"#),
                compile(r"(?i)subject:\s*([^\n\r]+)"),
                compile(r#"(?i)about\s+["']([^"']+)["']"#),
                compile(r#"(?i)regarding\s+["']([^"']+)["']"#),
            ],
            body_res: vec![
                compile(r#"(?i)saying\s*["']([^"']+)["']"#),
                compile(r#"(?i)that says\s*["']([^"']+)["']"#),
                compile(r#"(?i)message:\s*["']([^"']+)["']"#),
                compile(r#"(?i)body:\s*["']([^"']+)["']"#),
                // 不带引号的写法："saying hi"
                compile(r"(?i)saying\s+(.+)$"),
                compile(r"(?i)that says\s+(.+)$"),
            ],
            cc_re: compile(r"(?i)cc:\s*([^\s,]+)"),
            bcc_re: compile(r"(?i)bcc:\s*([^\s,]+)"),
            contact_res: vec![
                compile(
                    r"(?i)(?:call|message|text|contact)\s+([A-Za-z ]+?)(?:\s+(?:and|about|that|saying|on)\b|$)",
                ),
                compile(r"(?i)\bto\s+([A-Za-z ]+?)(?:\s+(?:and|about|that|saying|on)\b|$)"),
                compile(r"(?i)\bwith\s+([A-Za-z ]+?)(?:\s+(?:and|about|that|saying|on)\b|$)"),
            ],
            content_res: vec![
                compile(r#"(?i)(?:post|share|update)\s*["']([^"']+)["']"#),
                compile(r#"(?i)saying\s*["']([^"']+)["']"#),
                compile(r#"["']([^"']+)["']"#),
            ],
        }
    }

    /// 完整解析：服务与动作都识别出来才返回 Some
    pub fn parse(&self, request: &str) -> Option<ParsedRequest> {
        let lower = request.to_lowercase();
        let service = Self::detect_service(&lower)?;
        let action = Self::detect_action(&lower, service)?;
        let slots = self.extract_slots(request, service, action);
        Some(ParsedRequest {
            service: service.to_string(),
            action: action.to_string(),
            slots,
        })
    }

    pub fn detect_service(lower: &str) -> Option<&'static str> {
        for (service, patterns) in SERVICE_PATTERNS {
            if patterns.iter().any(|p| lower.contains(p)) {
                return Some(service);
            }
        }
        None
    }

    pub fn detect_action(lower: &str, service: &str) -> Option<&'static str> {
        for (action, patterns) in ACTION_PATTERNS {
            if patterns.iter().any(|p| lower.contains(p))
                && Self::is_valid_action(service, action)
            {
                return Some(action);
            }
        }

        // 邮件服务 + 发送类动词（"mail" 也算，裸 "gmail" 走这里）
        if EMAIL_SERVICES.contains(&service)
            && ["send", "write", "compose", "email", "mail"]
                .iter()
                .any(|w| lower.contains(w))
        {
            return Some(SEND_MESSAGE);
        }

        // 没有动作词时落到服务默认动作
        let has_action_word = ACTION_WORDS.iter().any(|w| lower.contains(w));
        if !has_action_word {
            return DEFAULT_ACTIONS
                .iter()
                .find(|(s, _)| *s == service)
                .map(|(_, a)| *a);
        }

        None
    }

    pub fn is_valid_action(service: &str, action: &str) -> bool {
        VALID_ACTIONS
            .iter()
            .find(|(s, _)| *s == service)
            .map(|(_, actions)| actions.contains(&action))
            .unwrap_or(false)
    }

    pub fn supported_actions(service: &str) -> Vec<String> {
        VALID_ACTIONS
            .iter()
            .find(|(s, _)| *s == service)
            .map(|(_, actions)| actions.iter().map(|a| a.to_string()).collect())
            .unwrap_or_default()
    }

    /// 按动作抽取槽位；抽不到的槽位缺席，绝不填猜测值
    pub fn extract_slots(
        &self,
        request: &str,
        service: &str,
        action: &str,
    ) -> HashMap<String, String> {
        let mut slots = HashMap::new();

        match action {
            SEND_MESSAGE if EMAIL_SERVICES.contains(&service) => {
                if let Some(m) = self.email_re.find(request) {
                    slots.insert("to".to_string(), m.as_str().to_string());
                }
                if let Some(subject) = first_capture(&self.subject_res, request) {
                    slots.insert("subject".to_string(), subject);
                }
                if let Some(body) = first_capture(&self.body_res, request) {
                    slots.insert("body".to_string(), body);
                }
                if let Some(c) = self.cc_re.captures(request) {
                    slots.insert("cc".to_string(), c[1].trim().to_string());
                }
                if let Some(c) = self.bcc_re.captures(request) {
                    slots.insert("bcc".to_string(), c[1].trim().to_string());
                }
            }
            SEND_MESSAGE | START_CALL => {
                if let Some(contact) = first_capture(&self.contact_res, request) {
                    let contact = strip_filler(&contact);
                    if !contact.is_empty() {
                        slots.insert("contact".to_string(), contact);
                    }
                }
                if action == SEND_MESSAGE {
                    if let Some(body) = first_capture(&self.body_res, request) {
                        slots.insert("message".to_string(), body);
                    }
                }
            }
            COMPOSE_POST => {
                if let Some(content) = first_capture(&self.content_res, request) {
                    slots.insert("content".to_string(), content);
                }
            }
            _ => {}
        }

        slots
    }

    /// 必填槽位中仍缺失的
    pub fn missing_slots(service: &str, action: &str, slots: &HashMap<String, String>) -> Vec<String> {
        let required: &[&str] = match action {
            SEND_MESSAGE if EMAIL_SERVICES.contains(&service) => &["to"],
            SEND_MESSAGE | START_CALL => &["contact"],
            COMPOSE_POST => &["content"],
            _ => &[],
        };
        required
            .iter()
            .filter(|r| !slots.contains_key(**r))
            .map(|r| r.to_string())
            .collect()
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    for re in patterns {
        if let Some(c) = re.captures(text) {
            let value = c[1].trim().to_string();
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

/// 去掉联系人名里的虚词
fn strip_filler(contact: &str) -> String {
    contact
        .split_whitespace()
        .filter(|w| {
            !matches!(
                w.to_lowercase().as_str(),
                "the" | "a" | "an" | "my" | "friend" | "contact"
            )
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_with_unquoted_body() {
        let parser = RequestParser::new();
        let parsed = parser
            .parse("Send an email to a@b.com saying hi")
            .unwrap();
        assert_eq!(parsed.service, "gmail");
        assert_eq!(parsed.action, SEND_MESSAGE);
        assert_eq!(parsed.slots.get("to").unwrap(), "a@b.com");
        assert_eq!(parsed.slots.get("body").unwrap(), "hi");
        assert!(RequestParser::missing_slots("gmail", SEND_MESSAGE, &parsed.slots).is_empty());
    }

    #[test]
    fn test_email_with_subject() {
        let parser = RequestParser::new();
        let parsed = parser
            .parse("compose email to bob@example.com about 'quarterly report' saying 'see attached'")
            .unwrap();
        assert_eq!(parsed.slots.get("subject").unwrap(), "quarterly report");
        assert_eq!(parsed.slots.get("body").unwrap(), "see attached");
    }

    #[test]
    fn test_skype_call() {
        let parser = RequestParser::new();
        let parsed = parser.parse("call Alice on skype").unwrap();
        assert_eq!(parsed.service, "skype");
        assert_eq!(parsed.action, START_CALL);
        assert_eq!(parsed.slots.get("contact").unwrap(), "Alice");
    }

    #[test]
    fn test_missing_recipient() {
        let parser = RequestParser::new();
        let parsed = parser.parse("send an email about the meeting").unwrap();
        assert_eq!(parsed.service, "gmail");
        let missing = RequestParser::missing_slots("gmail", SEND_MESSAGE, &parsed.slots);
        assert_eq!(missing, vec!["to".to_string()]);
    }

    #[test]
    fn test_bare_service_default_action() {
        assert_eq!(RequestParser::detect_action("gmail", "gmail"), Some(SEND_MESSAGE));
        assert_eq!(
            RequestParser::detect_action("twitter", "twitter"),
            Some(COMPOSE_POST)
        );
    }

    #[test]
    fn test_invalid_action_for_service() {
        assert!(!RequestParser::is_valid_action("twitter", START_CALL));
        assert!(RequestParser::is_valid_action("skype", START_CALL));
        let supported = RequestParser::supported_actions("gmail");
        assert!(supported.contains(&SEND_MESSAGE.to_string()));
        assert!(!supported.contains(&START_CALL.to_string()));
    }

    #[test]
    fn test_no_service_match() {
        let parser = RequestParser::new();
        assert!(parser.parse("what is the weather today").is_none());
    }
}
