//! 动作标签与动作结果
//!
//! ActionTag 是 Planner 输出 nextAction 的封闭集合；未知值为 ProtocolViolation，由编排器回退到 retrieve_data。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::EngineError;
use crate::retrieval::{EvidenceRecord, InsightRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTag {
    RetrieveData,
    QueryInsights,
    Sufficient,
}

impl ActionTag {
    /// 协议违规时的默认动作
    pub fn fallback() -> Self {
        ActionTag::RetrieveData
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionTag::RetrieveData => "retrieve_data",
            ActionTag::QueryInsights => "query_insights",
            ActionTag::Sufficient => "sufficient",
        }
    }
}

impl fmt::Display for ActionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionTag {
    type Err = EngineError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c })
            .collect();
        match normalized.as_str() {
            "retrieve_data" | "data_retrieval" | "search" | "retrieve" => Ok(ActionTag::RetrieveData),
            "query_insights" | "insights" | "analysis" => Ok(ActionTag::QueryInsights),
            "sufficient" | "final_answer" | "ready_to_synthesize" => Ok(ActionTag::Sufficient),
            _ => Err(EngineError::ProtocolViolation(format!(
                "unknown nextAction '{}'",
                raw.trim()
            ))),
        }
    }
}

/// Act 阶段的产出，交给 Observer
#[derive(Debug, Clone, Default)]
pub struct ActionResult {
    pub action: Option<ActionTag>,
    pub query_used: String,
    pub records: Vec<EvidenceRecord>,
    pub insights: Vec<InsightRecord>,
    pub retrieval_error: Option<String>,
}

const PREVIEW_CHARS: usize = 150;
const PREVIEW_ENTRIES: usize = 3;

impl ActionResult {
    pub fn new(action: ActionTag, query_used: impl Into<String>) -> Self {
        Self {
            action: Some(action),
            query_used: query_used.into(),
            ..Default::default()
        }
    }

    pub fn retrieval_failed(&self) -> bool {
        self.retrieval_error.is_some()
    }

    /// 供 Observer prompt 与推理日志使用的摘要
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        match self.action {
            Some(ActionTag::Sufficient) | None => {
                lines.push("No action taken; evidence judged sufficient.".to_string());
            }
            Some(ActionTag::RetrieveData) => match &self.retrieval_error {
                Some(err) => lines.push(format!("Retrieval unavailable: {err}")),
                None => lines.push(format!(
                    "Retrieved {} records for '{}'.",
                    self.records.len(),
                    self.query_used
                )),
            },
            Some(ActionTag::QueryInsights) => {}
        }
        if matches!(self.action, Some(ActionTag::RetrieveData | ActionTag::QueryInsights)) {
            lines.push(format!("Found {} cached insights.", self.insights.len()));
        }
        for (i, record) in self.records.iter().take(PREVIEW_ENTRIES).enumerate() {
            let preview: String = record.text.chars().take(PREVIEW_CHARS).collect();
            lines.push(format!("Entry {}: {}", i + 1, preview));
        }
        for insight in self.insights.iter().take(PREVIEW_ENTRIES) {
            lines.push(format!("Insight ({}): {}", insight.topic, insight.text));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tags_and_aliases() {
        assert_eq!("retrieve_data".parse::<ActionTag>().unwrap(), ActionTag::RetrieveData);
        assert_eq!(" Data-Retrieval ".parse::<ActionTag>().unwrap(), ActionTag::RetrieveData);
        assert_eq!("insights".parse::<ActionTag>().unwrap(), ActionTag::QueryInsights);
        assert_eq!("ready_to_synthesize".parse::<ActionTag>().unwrap(), ActionTag::Sufficient);
    }

    #[test]
    fn test_unknown_tag_is_protocol_violation() {
        let err = "web_search".parse::<ActionTag>().unwrap_err();
        assert!(matches!(err, EngineError::ProtocolViolation(_)));
    }

    #[test]
    fn test_summary_mentions_counts_and_failures() {
        let mut result = ActionResult::new(ActionTag::RetrieveData, "sleep");
        result.records = vec![EvidenceRecord::new("1", "slept 6h", 0.8)];
        let summary = result.summary();
        assert!(summary.contains("Retrieved 1 records"));
        assert!(summary.contains("Entry 1: slept 6h"));

        result.records.clear();
        result.retrieval_error = Some("connection refused".to_string());
        assert!(result.summary().starts_with("Retrieval unavailable"));
        assert!(result.retrieval_failed());
    }
}
