//! InsightCache：预计算洞察（KPI / 教练建议）只读查询
//!
//! 后台分析流水线（本 crate 之外）负责写入 InsightStore；引擎只调用 lookup，从不触发重算。
//! 过期只记录日志，不做强制。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::retrieval::keyword::terms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightKind {
    Kpi,
    Coaching,
}

/// 一条预计算洞察
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightRecord {
    pub kind: InsightKind,
    pub topic: String,
    pub text: String,
    pub computed_at: DateTime<Utc>,
}

impl InsightRecord {
    pub fn new(kind: InsightKind, topic: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind,
            topic: topic.into(),
            text: text.into(),
            computed_at: Utc::now(),
        }
    }

    pub fn computed_at(mut self, at: DateTime<Utc>) -> Self {
        self.computed_at = at;
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InsightError {
    #[error("insight store unavailable: {0}")]
    Unavailable(String),
}

/// 外部洞察存储：只读拉取契约
#[async_trait]
pub trait InsightStore: Send + Sync {
    async fn lookup(&self, hints: &[String]) -> Result<Vec<InsightRecord>, InsightError>;
}

/// 主题词族：查询命中任一词即带上该主题
const TOPIC_FAMILIES: &[(&str, &[&str])] = &[
    ("sleep", &["sleep", "rest", "tired", "fatigue", "energy"]),
    ("mood", &["mood", "feeling", "emotion", "happy", "sad", "depressed"]),
    ("productivity", &["productive", "productivity", "work", "focus", "efficient"]),
    ("exercise", &["exercise", "workout", "fitness", "physical", "activity"]),
    ("overall_health", &["health", "overall", "wellness", "wellbeing"]),
];

/// 从查询推导主题提示：先主题名，再查询关键词
pub fn topic_hints(query: &str) -> Vec<String> {
    let lower = query.to_lowercase();
    let mut hints: Vec<String> = TOPIC_FAMILIES
        .iter()
        .filter(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(topic, _)| topic.to_string())
        .collect();
    for t in terms(query) {
        if !hints.contains(&t) {
            hints.push(t);
        }
    }
    hints
}

/// 内存洞察存储：外部只追加，引擎只读
#[derive(Debug, Default)]
pub struct MemoryInsightStore {
    records: RwLock<Vec<InsightRecord>>,
}

impl MemoryInsightStore {
    pub fn new(records: Vec<InsightRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    /// 供后台分析流水线追加新洞察
    pub async fn append(&self, records: Vec<InsightRecord>) {
        self.records.write().await.extend(records);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// 加载后台流水线写出的 JSON 快照（generated_at / kpis / patterns / coaching）
    pub fn from_snapshot_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read insights snapshot {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&raw)
            .with_context(|| format!("parse insights snapshot {}", path.display()))?;
        let records = parse_snapshot(&value);
        tracing::info!("Loaded {} cached insights from {}", records.len(), path.display());
        Ok(Self::new(records))
    }

    fn matches(record: &InsightRecord, hints: &[String]) -> bool {
        let text = record.text.to_lowercase();
        hints
            .iter()
            .any(|h| *h == record.topic || (h.chars().count() >= 4 && text.contains(h.as_str())))
    }
}

#[async_trait]
impl InsightStore for MemoryInsightStore {
    async fn lookup(&self, hints: &[String]) -> Result<Vec<InsightRecord>, InsightError> {
        let records = self.records.read().await;
        let (mut kpis, coaching): (Vec<InsightRecord>, Vec<InsightRecord>) = records
            .iter()
            .filter(|r| Self::matches(r, hints))
            .cloned()
            .partition(|r| r.kind == InsightKind::Kpi);
        kpis.extend(coaching);
        Ok(kpis)
    }
}

fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|n| n.and_utc())
            })
    })
    .unwrap_or_else(Utc::now)
}

fn render_kpi(topic: &str, value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let fields: Vec<String> = map.iter().map(|(k, v)| format!("{k}={v}")).collect();
            format!("{topic} KPIs: {}", fields.join(", "))
        }
        other => format!("{topic} KPI: {other}"),
    }
}

fn parse_snapshot(value: &serde_json::Value) -> Vec<InsightRecord> {
    let computed_at = parse_timestamp(value.get("generated_at").and_then(|v| v.as_str()));
    let mut out = Vec::new();

    if let Some(kpis) = value.get("kpis").and_then(|v| v.as_object()) {
        for (topic, kpi) in kpis {
            out.push(
                InsightRecord::new(InsightKind::Kpi, topic.clone(), render_kpi(topic, kpi))
                    .computed_at(computed_at),
            );
        }
    }

    if let Some(patterns) = value.get("patterns").and_then(|v| v.as_array()) {
        for p in patterns {
            if let Some(text) = p.get("pattern").and_then(|v| v.as_str()) {
                out.push(
                    InsightRecord::new(InsightKind::Kpi, "pattern", format!("Pattern: {text}"))
                        .computed_at(computed_at),
                );
            }
        }
    }

    if let Some(coaching) = value.get("coaching").and_then(|v| v.as_array()) {
        for c in coaching {
            let category = c.get("category").and_then(|v| v.as_str()).unwrap_or("general");
            let insight = c.get("insight").and_then(|v| v.as_str()).unwrap_or_default();
            let recommendation = c
                .get("recommendation")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            if insight.is_empty() && recommendation.is_empty() {
                continue;
            }
            out.push(
                InsightRecord::new(
                    InsightKind::Coaching,
                    category.to_lowercase(),
                    format!("{insight} Recommendation: {recommendation}").trim().to_string(),
                )
                .computed_at(computed_at),
            );
        }
    }
    out
}

/// 洞察缓存适配层：超时、条数上限、过期告警；失败时返回空列表
#[derive(Clone)]
pub struct InsightCache {
    store: Arc<dyn InsightStore>,
    timeout: Duration,
    max_results: usize,
    stale_after: chrono::Duration,
}

impl InsightCache {
    pub fn new(store: Arc<dyn InsightStore>, timeout: Duration, max_results: usize) -> Self {
        Self {
            store,
            timeout,
            max_results: max_results.max(1),
            stale_after: chrono::Duration::hours(24),
        }
    }

    pub fn with_stale_after_hours(mut self, hours: i64) -> Self {
        self.stale_after = chrono::Duration::hours(hours.max(1));
        self
    }

    pub async fn lookup(&self, hints: &[String]) -> Vec<InsightRecord> {
        if hints.is_empty() {
            return Vec::new();
        }
        let mut records = match tokio::time::timeout(self.timeout, self.store.lookup(hints)).await {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                tracing::warn!("Insight lookup failed ({}), continuing without insights", e);
                return Vec::new();
            }
            Err(_) => {
                tracing::warn!(
                    "Insight lookup timed out after {}s, continuing without insights",
                    self.timeout.as_secs()
                );
                return Vec::new();
            }
        };
        records.truncate(self.max_results);

        let now = Utc::now();
        let stale = records
            .iter()
            .filter(|r| now - r.computed_at > self.stale_after)
            .count();
        if stale > 0 {
            tracing::warn!(stale, "Cached insights are older than {}h", self.stale_after.num_hours());
        }
        records
    }
}
