//! 远程向量检索服务客户端
//!
//! POST {base_url}/search，body: {"query": "...", "limit": N}；返回 {"results": [EvidenceRecord...]}。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::retrieval::{EvidenceRecord, SearchError, SemanticSearch};

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    limit: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<EvidenceRecord>,
}

/// 基于 reqwest 的 SemanticSearch 实现（无状态，可跨请求共享）
pub struct HttpSemanticSearch {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSemanticSearch {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/search", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SemanticSearch for HttpSemanticSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<EvidenceRecord>, SearchError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&SearchRequest { query, limit })
            .send()
            .await
            .map_err(|e| SearchError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SearchError::Transport(format!("HTTP {}", status)));
        }

        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| SearchError::BadResponse(e.to_string()))?;
        Ok(body.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_normalized() {
        let s = HttpSemanticSearch::new("http://127.0.0.1:9000/", Duration::from_secs(2)).unwrap();
        assert_eq!(s.endpoint(), "http://127.0.0.1:9000/search");
    }

    #[tokio::test]
    async fn test_unreachable_is_transport_error() {
        // 端口 9 (discard) 通常无人监听
        let s = HttpSemanticSearch::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = s.search("sleep", 5).await.unwrap_err();
        assert!(matches!(err, SearchError::Transport(_)));
    }
}
