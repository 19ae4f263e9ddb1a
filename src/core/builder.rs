//! Orchestrator 构建器：统一的引擎初始化逻辑
//!
//! CLI、HTTP 服务与测试共用同一套装配；from_config 按 AppConfig 选择 LLM、检索后端与洞察来源。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::config::{AppConfig, LlmSection, TimeoutsSection};
use crate::core::{EngineConfig, EngineError, Orchestrator, RecoveryEngine};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::react::{Observer, ReasonPlanner, Synthesizer};
use crate::retrieval::{
    HttpSemanticSearch, InsightCache, InsightStore, KeywordSearch, MemoryInsightStore,
    RetrievalTool, SemanticSearch,
};
use crate::safety::{LlmSafetyProvider, SafetyGate, SafetyProvider};

/// 根据配置与环境变量选择 LLM 后端（OpenAI 兼容端点 / Mock）
pub fn create_llm_from_config(llm: &LlmSection, model: &str) -> Arc<dyn LlmClient> {
    if llm.provider.eq_ignore_ascii_case("mock") {
        tracing::info!("Using Mock LLM (provider = mock)");
        return Arc::new(MockLlmClient);
    }
    match llm.api_key() {
        Some(key) => {
            tracing::info!("Using {} LLM ({})", llm.provider, model);
            Arc::new(
                OpenAiClient::new(Some(&llm.base_url), model, Some(&key))
                    .with_max_tokens(llm.max_tokens)
                    .with_temperature(llm.temperature),
            )
        }
        None => {
            tracing::warn!("{} not set, using Mock LLM for {}", llm.api_key_env, model);
            Arc::new(MockLlmClient)
        }
    }
}

/// 引擎构建器：LLM 与检索后端必填，其余有默认值
pub struct OrchestratorBuilder {
    llm: Option<Arc<dyn LlmClient>>,
    planner_llm: Option<Arc<dyn LlmClient>>,
    safety_provider: Option<Arc<dyn SafetyProvider>>,
    search: Option<Arc<dyn SemanticSearch>>,
    insight_store: Option<Arc<dyn InsightStore>>,
    config: EngineConfig,
    timeouts: TimeoutsSection,
    retrieval_hard_cap: usize,
    max_insights: usize,
    insight_stale_hours: i64,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            llm: None,
            planner_llm: None,
            safety_provider: None,
            search: None,
            insight_store: None,
            config: EngineConfig::default(),
            timeouts: TimeoutsSection::default(),
            retrieval_hard_cap: 20,
            max_insights: 5,
            insight_stale_hours: 24,
        }
    }

    /// 按 AppConfig 装配：每个组件使用各自配置的模型
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let engine = cfg.engine.normalized();
        let reasoning = create_llm_from_config(&cfg.llm, &cfg.llm.reasoning_model);
        let planner = create_llm_from_config(&cfg.llm, &cfg.llm.planner_model);
        let safety = create_llm_from_config(&cfg.llm, &cfg.llm.safety_model);

        let search: Arc<dyn SemanticSearch> = if let Some(url) = &cfg.data.search_url {
            tracing::info!("Using remote semantic search at {}", url);
            Arc::new(
                HttpSemanticSearch::new(url, cfg.timeouts.retrieval())
                    .map_err(|e| anyhow::anyhow!("build search client: {e}"))?,
            )
        } else if let Some(path) = &cfg.data.records_path {
            Arc::new(KeywordSearch::from_json_file(path)?)
        } else {
            tracing::warn!("No records_path or search_url configured, retrieval will return nothing");
            Arc::new(KeywordSearch::default())
        };

        let insights: Arc<dyn InsightStore> = match &cfg.data.insights_path {
            Some(path) if path.exists() => Arc::new(
                MemoryInsightStore::from_snapshot_file(path)
                    .with_context(|| format!("load insights from {}", path.display()))?,
            ),
            Some(path) => {
                tracing::warn!("Insights snapshot {} not found, continuing without insights", path.display());
                Arc::new(MemoryInsightStore::default())
            }
            None => Arc::new(MemoryInsightStore::default()),
        };

        Ok(Self::new()
            .with_llm(reasoning)
            .with_planner_llm(planner)
            .with_safety_provider(Arc::new(LlmSafetyProvider::new(safety)))
            .with_search(search)
            .with_insight_store(insights)
            .with_engine_config(EngineConfig {
                max_iterations: engine.max_iterations,
                retrieval_limit: engine.retrieval_limit,
                max_retrieval_failures: engine.max_retrieval_failures,
                safety_fail_closed: engine.safety_fail_closed,
                stream_buffer: engine.stream_buffer,
            })
            .with_timeouts(cfg.timeouts.clone())
            .with_retrieval_hard_cap(engine.retrieval_hard_cap)
            .with_max_insights(engine.max_insights)
            .with_insight_stale_hours(cfg.data.insight_stale_hours))
    }

    /// Observer / Synthesizer 的 LLM；未单独设置时 Planner 与安全分类也使用它
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_planner_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.planner_llm = Some(llm);
        self
    }

    pub fn with_safety_provider(mut self, provider: Arc<dyn SafetyProvider>) -> Self {
        self.safety_provider = Some(provider);
        self
    }

    pub fn with_search(mut self, search: Arc<dyn SemanticSearch>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_insight_store(mut self, store: Arc<dyn InsightStore>) -> Self {
        self.insight_store = Some(store);
        self
    }

    pub fn with_engine_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    pub fn with_safety_fail_closed(mut self, fail_closed: bool) -> Self {
        self.config.safety_fail_closed = fail_closed;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutsSection) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_retrieval_hard_cap(mut self, cap: usize) -> Self {
        self.retrieval_hard_cap = cap;
        self
    }

    pub fn with_max_insights(mut self, max: usize) -> Self {
        self.max_insights = max;
        self
    }

    pub fn with_insight_stale_hours(mut self, hours: i64) -> Self {
        self.insight_stale_hours = hours;
        self
    }

    pub fn build(self) -> Result<Orchestrator, EngineError> {
        let llm = self
            .llm
            .ok_or_else(|| EngineError::ConfigError("reasoning LLM is required".to_string()))?;
        let search = self
            .search
            .ok_or_else(|| EngineError::ConfigError("semantic search backend is required".to_string()))?;
        if self.config.max_iterations == 0 {
            return Err(EngineError::ConfigError("max_iterations must be >= 1".to_string()));
        }
        let hard_cap = self.retrieval_hard_cap.max(1);
        let mut config = self.config;
        config.retrieval_limit = config.retrieval_limit.clamp(1, hard_cap);
        config.max_retrieval_failures = config.max_retrieval_failures.max(1);
        config.stream_buffer = config.stream_buffer.max(1);

        let planner_llm = self.planner_llm.unwrap_or_else(|| llm.clone());
        let safety_provider = self
            .safety_provider
            .unwrap_or_else(|| Arc::new(LlmSafetyProvider::new(llm.clone())));
        let insight_store = self
            .insight_store
            .unwrap_or_else(|| Arc::new(MemoryInsightStore::default()));
        let generation: Duration = self.timeouts.generation();

        Ok(Orchestrator {
            safety: SafetyGate::new(safety_provider, self.timeouts.safety()),
            retrieval: RetrievalTool::new(search, hard_cap, self.timeouts.retrieval()),
            insights: InsightCache::new(insight_store, self.timeouts.insights(), self.max_insights)
                .with_stale_after_hours(self.insight_stale_hours),
            planner: ReasonPlanner::new(planner_llm, generation),
            observer: Observer::new(llm.clone(), generation),
            synthesizer: Synthesizer::new(llm.clone(), generation),
            recovery: RecoveryEngine::new(config.safety_fail_closed),
            model: llm.model_name().to_string(),
            config,
        })
    }
}
