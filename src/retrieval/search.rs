//! RetrievalTool：语义检索适配层
//!
//! 包装外部 SemanticSearch：对 limit 施加硬上限、按分数降序、单次调用超时；传输失败映射为 RetrievalUnavailable。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::EngineError;

/// 一条检索证据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl EvidenceRecord {
    pub fn new(id: impl Into<String>, text: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            score,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("bad response: {0}")]
    BadResponse(String),
}

/// 外部语义检索能力；"无结果"返回空 Vec 而不是错误
#[async_trait]
pub trait SemanticSearch: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<EvidenceRecord>, SearchError>;
}

/// 检索工具：limit 默认 5，硬上限 hard_cap
#[derive(Clone)]
pub struct RetrievalTool {
    backend: Arc<dyn SemanticSearch>,
    hard_cap: usize,
    timeout: Duration,
}

impl RetrievalTool {
    pub fn new(backend: Arc<dyn SemanticSearch>, hard_cap: usize, timeout: Duration) -> Self {
        Self {
            backend,
            hard_cap: hard_cap.max(1),
            timeout,
        }
    }

    pub fn hard_cap(&self) -> usize {
        self.hard_cap
    }

    /// 将调用方请求的 limit 收敛到 1..=hard_cap
    pub fn effective_limit(&self, requested: usize) -> usize {
        requested.clamp(1, self.hard_cap)
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<EvidenceRecord>, EngineError> {
        let limit = self.effective_limit(limit);
        let result = tokio::time::timeout(self.timeout, self.backend.search(query, limit)).await;
        let mut records = match result {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => return Err(EngineError::RetrievalUnavailable(e.to_string())),
            Err(_) => {
                return Err(EngineError::RetrievalUnavailable(format!(
                    "search timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        };
        records.sort_by(|a, b| b.score.total_cmp(&a.score));
        records.truncate(limit);
        tracing::debug!(query, limit, returned = records.len(), "retrieval");
        Ok(records)
    }
}
