//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ELCH__*` 覆盖（双下划线表示嵌套，
//! 如 `ELCH__LLM__MODEL=gpt-4o-mini`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub sessions: SessionsSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub limits: LimitsSection,
}

/// [app] 段：应用名
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：模型、端点与超时
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmSection {
    #[serde(default = "default_model")]
    pub model: String,
    /// OpenAI 兼容端点；未设置时用官方端点
    pub base_url: Option<String>,
    /// 分类调用超时（秒）；超时回退为 task
    #[serde(default = "default_classify_timeout")]
    pub classify_timeout_secs: u64,
    /// 普通补全调用超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_classify_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    60
}

/// [sessions] 段：空闲回收与排队策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionsSection {
    /// 空闲会话回收阈值（秒）
    pub idle_timeout_secs: u64,
    /// 后台清扫间隔（秒）
    pub sweep_interval_secs: u64,
    /// 引擎调度时会话被占用是否排队等待（false 时任务转为 paused）
    pub queue_on_busy: bool,
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 1800,
            sweep_interval_secs: 60,
            queue_on_busy: false,
        }
    }
}

/// [engine] 段：重试与三层超时中的后两层（分类超时在 [llm]）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Unverified 结果的额外重试次数上限
    pub max_step_retries: u32,
    /// 单次 dispatch 超时（秒）
    pub step_timeout_secs: u64,
    /// 任务墙钟上限（秒），超过则暂停而非杀死会话
    pub task_deadline_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_step_retries: 2,
            step_timeout_secs: 60,
            task_deadline_secs: 600,
        }
    }
}

/// [limits] 段：按类别独立的滑动窗口配额
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    pub general_quota: usize,
    pub general_window_secs: u64,
    pub task_quota: usize,
    pub task_window_secs: u64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            general_quota: 30,
            general_window_secs: 60,
            task_quota: 10,
            task_window_secs: 60,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            llm: LlmSection::default(),
            sessions: SessionsSection::default(),
            engine: EngineSection::default(),
            limits: LimitsSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 ELCH__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 ELCH__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ELCH")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
