//! 会话注册表
//!
//! 以 (service, profile) 为键管理持久自动化会话：busy 标志保证同一会话
//! 同一时刻只有一个持有者，FIFO 等待队列做交接，释放时持久化凭据快照，
//! 后台清扫回收空闲会话。

mod registry;

pub use registry::SessionRegistry;

use tokio_util::sync::CancellationToken;

use crate::automation::PageState;

/// 会话键：服务 + 凭据 profile
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub service: String,
    pub profile: String,
}

impl SessionKey {
    pub fn new(service: &str, profile: &str) -> Self {
        Self {
            service: service.to_string(),
            profile: profile.to_string(),
        }
    }

    /// 持久化键名
    pub fn storage_key(&self) -> String {
        format!("session:{}:{}", self.service, self.profile)
    }
}

/// 会话持有凭证：acquire 返回，release 收回
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub key: SessionKey,
    /// 引擎上下文 ID
    pub context: String,
    /// 会话代数：强制关闭后重建的会话代数不同
    pub epoch: u64,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// 会话是否已被强制关闭
    pub fn terminated(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 强制关闭信号，供长操作用 select 监听
    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

/// 登录判定结果
#[derive(Debug, Clone, Copy)]
pub struct LoginStatus {
    /// [0,1]
    pub confidence: f32,
    /// 高置信短路：confidence >= 0.8
    pub logged_in: bool,
}

/// 各服务的已登录标记名
const LOGGED_IN_MARKERS: &[(&str, &[&str])] = &[
    ("gmail", &["compose", "inbox"]),
    ("outlook", &["new_mail", "inbox"]),
    ("skype", &["chat_list", "contacts"]),
];

/// 未登录标记名（各服务通用）
const LOGGED_OUT_MARKERS: &[&str] = &["signin", "login_form"];

/// 对页面快照打分：0.5 起步，登录标记 +0.4，未登录标记或登录页 URL -0.4
pub fn score_login(service: &str, state: &PageState) -> LoginStatus {
    let mut confidence: f32 = 0.5;

    let positive = LOGGED_IN_MARKERS
        .iter()
        .find(|(s, _)| *s == service)
        .map(|(_, markers)| markers.iter().any(|m| state.has_marker(m)))
        .unwrap_or(false);
    if positive {
        confidence += 0.4;
    }

    let url_lower = state.url.to_lowercase();
    let negative = LOGGED_OUT_MARKERS.iter().any(|m| state.has_marker(m))
        || url_lower.contains("signin")
        || url_lower.contains("login");
    if negative {
        confidence -= 0.4;
    }

    let confidence = confidence.clamp(0.0, 1.0);
    LoginStatus {
        confidence,
        logged_in: confidence >= 0.8,
    }
}
