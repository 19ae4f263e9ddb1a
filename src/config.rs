//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `LIFELOG__*` 覆盖（双下划线表示嵌套，如 `LIFELOG__ENGINE__MAX_ITERATIONS=5`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineSection,
    pub timeouts: TimeoutsSection,
    pub llm: LlmSection,
    pub data: DataSection,
    pub web: WebSection,
}

/// [engine] 段：循环上限、检索条数、安全策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub max_iterations: usize,
    pub retrieval_limit: usize,
    /// 无论调用方请求多少，单次检索最多返回的条数
    pub retrieval_hard_cap: usize,
    /// 连续检索失败多少次后直接合成
    pub max_retrieval_failures: usize,
    pub safety_fail_closed: bool,
    /// 流式事件通道容量
    pub stream_buffer: usize,
    pub max_insights: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            retrieval_limit: 5,
            retrieval_hard_cap: 20,
            max_retrieval_failures: 2,
            safety_fail_closed: true,
            stream_buffer: 32,
            max_insights: 5,
        }
    }
}

impl EngineSection {
    /// 规范化：max_iterations ≥ 1，retrieval_limit ∈ 1..=retrieval_hard_cap
    pub fn normalized(&self) -> Self {
        let hard_cap = self.retrieval_hard_cap.max(1);
        Self {
            max_iterations: self.max_iterations.max(1),
            retrieval_limit: self.retrieval_limit.clamp(1, hard_cap),
            retrieval_hard_cap: hard_cap,
            max_retrieval_failures: self.max_retrieval_failures.max(1),
            safety_fail_closed: self.safety_fail_closed,
            stream_buffer: self.stream_buffer.max(1),
            max_insights: self.max_insights.max(1),
        }
    }
}

/// [timeouts] 段：各外部调用的超时（秒）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutsSection {
    pub generation_secs: u64,
    pub safety_secs: u64,
    pub retrieval_secs: u64,
    pub insights_secs: u64,
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            generation_secs: 15,
            safety_secs: 10,
            retrieval_secs: 5,
            insights_secs: 2,
        }
    }
}

impl TimeoutsSection {
    pub fn generation(&self) -> Duration {
        Duration::from_secs(self.generation_secs.max(1))
    }

    pub fn safety(&self) -> Duration {
        Duration::from_secs(self.safety_secs.max(1))
    }

    pub fn retrieval(&self) -> Duration {
        Duration::from_secs(self.retrieval_secs.max(1))
    }

    pub fn insights(&self) -> Duration {
        Duration::from_secs(self.insights_secs.max(1))
    }
}

/// [llm] 段：OpenAI 兼容端点与各组件模型
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// nvidia | openai | mock
    pub provider: String,
    pub base_url: String,
    /// 存放 API Key 的环境变量名
    pub api_key_env: String,
    /// Observer 与 Synthesizer 使用的模型
    pub reasoning_model: String,
    pub planner_model: String,
    pub safety_model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "nvidia".to_string(),
            base_url: "https://integrate.api.nvidia.com/v1".to_string(),
            api_key_env: "NVIDIA_API_KEY".to_string(),
            reasoning_model: "meta/llama-3.1-70b-instruct".to_string(),
            planner_model: "meta/llama-3.1-8b-instruct".to_string(),
            safety_model: "meta/llama-3.1-8b-instruct".to_string(),
            max_tokens: 1500,
            temperature: 0.7,
        }
    }
}

impl LlmSection {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

/// [data] 段：检索与洞察数据来源
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataSection {
    /// 本地记录 JSON（KeywordSearch）
    pub records_path: Option<PathBuf>,
    /// 预计算洞察快照 JSON
    pub insights_path: Option<PathBuf>,
    /// 远程检索服务地址；设置后优先于 records_path
    pub search_url: Option<String>,
    pub insight_stale_hours: i64,
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            records_path: None,
            insights_path: None,
            search_url: None,
            insight_stale_hours: 24,
        }
    }
}

/// [web] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub bind: String,
    /// 会话历史最多保留的消息条数
    pub history_capacity: usize,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            history_capacity: 200,
        }
    }
}

/// 从 config 目录加载配置，环境变量 LIFELOG__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 LIFELOG__*（双下划线表示嵌套键）
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
        } else {
            tracing::warn!("Config file {} not found, ignoring", path.display());
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("LIFELOG")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    let mut cfg: AppConfig = c.try_deserialize()?;
    cfg.engine = cfg.engine.normalized();
    Ok(cfg)
}
