//! ReasonPlanner：根据当前状态规划下一步动作
//!
//! 调用 LLM 得到 `REASONING / NEXT_ACTION / ACTION_DETAILS / CONFIDENCE` 行协议回复并解析为 Plan。
//! nextAction 的合法性由 Plan::next_action 校验。

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::core::{AgentState, EngineError};
use crate::llm::{generate_within, LlmClient};
use crate::react::action::ActionTag;
use crate::react::prompts::{self, extract_field};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl FromStr for Confidence {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let upper = raw.trim().to_uppercase();
        if upper.starts_with("HIGH") {
            Ok(Confidence::High)
        } else if upper.starts_with("MED") {
            Ok(Confidence::Medium)
        } else if upper.starts_with("LOW") {
            Ok(Confidence::Low)
        } else {
            Err(())
        }
    }
}

/// Planner 输出
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub reasoning: String,
    /// LLM 原样给出的 nextAction
    pub raw_action: String,
    /// 改写后的检索词（可选）
    pub details: Option<String>,
    pub confidence: Confidence,
}

impl Plan {
    /// 解析行协议回复；缺少 REASONING 时以全文作为推理文本
    pub fn parse(reply: &str) -> Self {
        let reasoning = extract_field(reply, "REASONING").unwrap_or_else(|| reply.trim().to_string());
        let raw_action = extract_field(reply, "NEXT_ACTION").unwrap_or_default();
        let details = extract_field(reply, "ACTION_DETAILS").filter(|d| {
            let lower = d.to_lowercase();
            !matches!(lower.as_str(), "none" | "n/a" | "na" | "-")
        });
        let confidence = extract_field(reply, "CONFIDENCE")
            .and_then(|c| c.parse().ok())
            .unwrap_or(Confidence::Medium);
        Self {
            reasoning,
            raw_action,
            details,
            confidence,
        }
    }

    /// Planner 不可用时的默认计划
    pub fn fallback(reason: &str) -> Self {
        Self {
            reasoning: format!("Planner unavailable ({reason}); defaulting to data retrieval."),
            raw_action: ActionTag::fallback().as_str().to_string(),
            details: None,
            confidence: Confidence::Low,
        }
    }

    pub fn next_action(&self) -> Result<ActionTag, EngineError> {
        self.raw_action.parse()
    }
}

pub struct ReasonPlanner {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl ReasonPlanner {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    pub async fn plan(&self, state: &AgentState) -> Result<Plan, EngineError> {
        let observations: Vec<String> = state.observations().iter().map(|o| o.text.clone()).collect();
        let prompt = prompts::plan_prompt(
            state.query(),
            &observations,
            state.retrieved_data().len(),
            state.cached_insights().len(),
            state.iteration_count(),
            state.max_iterations(),
        );
        let reply = generate_within(self.llm.as_ref(), prompts::REACT_SYSTEM, &prompt, self.timeout)
            .await
            .map_err(|e| EngineError::from_llm("planner", e))?;
        let plan = Plan::parse(&reply);
        tracing::debug!(action = %plan.raw_action, confidence = ?plan.confidence, "plan");
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EnginePhase;
    use crate::llm::MockLlmClient;

    #[test]
    fn test_parse_full_reply() {
        let reply = "REASONING: I need sleep entries\nNEXT_ACTION: retrieve_data\nACTION_DETAILS: sleep quality last week\nCONFIDENCE: HIGH";
        let plan = Plan::parse(reply);
        assert_eq!(plan.reasoning, "I need sleep entries");
        assert_eq!(plan.next_action().unwrap(), ActionTag::RetrieveData);
        assert_eq!(plan.details.as_deref(), Some("sleep quality last week"));
        assert_eq!(plan.confidence, Confidence::High);
    }

    #[test]
    fn test_parse_missing_action_is_violation() {
        let plan = Plan::parse("Let me think about it.");
        assert_eq!(plan.reasoning, "Let me think about it.");
        assert!(matches!(plan.next_action(), Err(EngineError::ProtocolViolation(_))));
        assert_eq!(plan.confidence, Confidence::Medium);
    }

    #[test]
    fn test_details_none_dropped() {
        let plan = Plan::parse("NEXT_ACTION: sufficient\nACTION_DETAILS: none");
        assert_eq!(plan.details, None);
        assert_eq!(plan.next_action().unwrap(), ActionTag::Sufficient);
    }

    #[test]
    fn test_fallback_plan_retrieves() {
        let plan = Plan::fallback("timeout");
        assert_eq!(plan.next_action().unwrap(), ActionTag::RetrieveData);
        assert_eq!(plan.confidence, Confidence::Low);
    }

    #[tokio::test]
    async fn test_plan_with_mock_retrieves_first() {
        let mut state = AgentState::new("How did I sleep?", 3).unwrap();
        state.transition(EnginePhase::InputSafety).unwrap();
        state.transition(EnginePhase::Reason).unwrap();
        state.begin_cycle().unwrap();
        let planner = ReasonPlanner::new(Arc::new(MockLlmClient), Duration::from_secs(5));
        let plan = planner.plan(&state).await.unwrap();
        assert_eq!(plan.next_action().unwrap(), ActionTag::RetrieveData);
    }
}
