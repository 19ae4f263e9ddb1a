//! 内存关键词检索
//!
//! 离线/测试用的 SemanticSearch 实现：按查询词覆盖率打分，不做向量化。记录可从 JSON 文件加载。

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;

use crate::retrieval::{EvidenceRecord, SearchError, SemanticSearch};

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "you", "your", "are", "was", "what", "when", "how", "why", "with",
    "that", "this", "have", "has", "had", "see", "any", "about", "from", "into", "does", "did",
    "can", "could", "would", "should", "there", "their", "been", "over", "past", "most", "my",
    "me", "do", "in", "of", "on", "is", "it", "to", "a", "an", "i",
];

/// 文本切词：小写、字母数字、长度 ≥ 3、去停用词
pub fn terms(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(w))
    {
        if !out.iter().any(|t| t == word) {
            out.push(word.to_string());
        }
    }
    out
}

/// 内存关键词检索
#[derive(Debug, Default)]
pub struct KeywordSearch {
    records: Vec<EvidenceRecord>,
}

impl KeywordSearch {
    pub fn new(records: Vec<EvidenceRecord>) -> Self {
        Self { records }
    }

    /// 从 JSON 数组文件加载（元素为 {id, text, metadata?}）
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read records from {}", path.display()))?;
        let records: Vec<EvidenceRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("parse records in {}", path.display()))?;
        tracing::info!("Loaded {} lifelog records from {}", records.len(), path.display());
        Ok(Self::new(records))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn score(query_terms: &[String], text: &str) -> f32 {
        if query_terms.is_empty() {
            return 0.0;
        }
        let doc = text.to_lowercase();
        let hits = query_terms.iter().filter(|t| doc.contains(t.as_str())).count();
        hits as f32 / query_terms.len() as f32
    }
}

#[async_trait]
impl SemanticSearch for KeywordSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<EvidenceRecord>, SearchError> {
        let query_terms = terms(query);
        let mut hits: Vec<EvidenceRecord> = self
            .records
            .iter()
            .filter_map(|r| {
                let score = Self::score(&query_terms, &r.text);
                (score > 0.0).then(|| EvidenceRecord {
                    score,
                    ..r.clone()
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }
}
