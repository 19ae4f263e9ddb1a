//! 状态定义：AgentState、状态机阶段与审计记录
//!
//! 每个请求一个 AgentState，由编排器单独持有；所有日志字段只追加。阶段转换在 transition 中校验。

use serde::{Deserialize, Serialize};

use crate::core::EngineError;
use crate::retrieval::{EvidenceRecord, InsightRecord};

/// 状态机阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePhase {
    Start,
    InputSafety,
    Reason,
    Act,
    Observe,
    Synthesize,
    OutputSafety,
    Blocked,
    Delivered,
    Modified,
}

impl EnginePhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EnginePhase::Blocked | EnginePhase::Delivered | EnginePhase::Modified
        )
    }

    /// 合法转换表
    pub fn can_transition_to(self, next: EnginePhase) -> bool {
        use EnginePhase::*;
        matches!(
            (self, next),
            (Start, InputSafety)
                | (InputSafety, Blocked)
                | (InputSafety, Reason)
                | (Reason, Act)
                | (Act, Observe)
                | (Observe, Reason)
                | (Observe, Synthesize)
                | (Synthesize, OutputSafety)
                | (OutputSafety, Delivered)
                | (OutputSafety, Modified)
                | (OutputSafety, Blocked)
        )
    }

    /// 对外事件中的节点名
    pub fn node(self) -> &'static str {
        match self {
            EnginePhase::Start => "start",
            EnginePhase::InputSafety => "safety_check_input",
            EnginePhase::Reason => "react_reason",
            EnginePhase::Act => "react_act",
            EnginePhase::Observe => "react_observe",
            EnginePhase::Synthesize => "synthesize_response",
            EnginePhase::OutputSafety => "safety_check_output",
            EnginePhase::Blocked => "blocked",
            EnginePhase::Delivered => "delivered",
            EnginePhase::Modified => "modified",
        }
    }
}

/// 终止状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Blocked,
    Delivered,
    /// 回复已交付，但附带警示说明
    Modified,
}

impl TerminalState {
    pub fn phase(self) -> EnginePhase {
        match self {
            TerminalState::Blocked => EnginePhase::Blocked,
            TerminalState::Delivered => EnginePhase::Delivered,
            TerminalState::Modified => EnginePhase::Modified,
        }
    }
}

/// 推理审计记录
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub step: String,
    pub description: String,
}

impl ReasoningStep {
    pub fn new(step: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            description: description.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyPhase {
    Input,
    Output,
}

/// 一次安全检查的记录
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyCheck {
    #[serde(rename = "type")]
    pub phase: SafetyPhase,
    pub is_safe: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub category: Option<String>,
    pub should_block: bool,
    pub needs_modification: bool,
    #[serde(skip)]
    pub explanation: String,
}

/// Observer 产出
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub text: String,
    pub is_sufficient: bool,
}

/// 单请求状态：由编排器独占，请求结束后丢弃
#[derive(Debug, Clone)]
pub struct AgentState {
    query: String,
    max_iterations: usize,
    phase: EnginePhase,
    retrieved_data: Vec<EvidenceRecord>,
    cached_insights: Vec<InsightRecord>,
    reasoning_steps: Vec<ReasoningStep>,
    safety_checks: Vec<SafetyCheck>,
    observations: Vec<Observation>,
    iteration_count: usize,
    should_continue: bool,
    response: Option<String>,
    consecutive_retrieval_failures: usize,
}

impl AgentState {
    pub fn new(query: &str, max_iterations: usize) -> Result<Self, EngineError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(EngineError::InvalidRequest("message is required".to_string()));
        }
        if max_iterations == 0 {
            return Err(EngineError::ConfigError("max_iterations must be >= 1".to_string()));
        }
        Ok(Self {
            query: query.to_string(),
            max_iterations,
            phase: EnginePhase::Start,
            retrieved_data: Vec::new(),
            cached_insights: Vec::new(),
            reasoning_steps: Vec::new(),
            safety_checks: Vec::new(),
            observations: Vec::new(),
            iteration_count: 0,
            should_continue: true,
            response: None,
            consecutive_retrieval_failures: 0,
        })
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn iteration_count(&self) -> usize {
        self.iteration_count
    }

    pub fn should_continue(&self) -> bool {
        self.should_continue
    }

    pub fn retrieved_data(&self) -> &[EvidenceRecord] {
        &self.retrieved_data
    }

    pub fn cached_insights(&self) -> &[InsightRecord] {
        &self.cached_insights
    }

    pub fn reasoning_steps(&self) -> &[ReasoningStep] {
        &self.reasoning_steps
    }

    pub fn safety_checks(&self) -> &[SafetyCheck] {
        &self.safety_checks
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    pub fn consecutive_retrieval_failures(&self) -> usize {
        self.consecutive_retrieval_failures
    }

    /// 校验并执行阶段转换
    pub fn transition(&mut self, next: EnginePhase) -> Result<(), EngineError> {
        if !self.phase.can_transition_to(next) {
            return Err(EngineError::IllegalTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    /// 进入新一轮 Reason→Act→Observe；iteration_count 不超过 max_iterations
    pub fn begin_cycle(&mut self) -> Result<usize, EngineError> {
        if self.phase != EnginePhase::Reason {
            return Err(EngineError::IllegalTransition {
                from: self.phase,
                to: EnginePhase::Reason,
            });
        }
        if self.iteration_count >= self.max_iterations {
            return Err(EngineError::ConfigError(format!(
                "cycle {} exceeds max_iterations {}",
                self.iteration_count + 1,
                self.max_iterations
            )));
        }
        self.iteration_count += 1;
        Ok(self.iteration_count)
    }

    pub fn is_final_cycle(&self) -> bool {
        self.iteration_count >= self.max_iterations
    }

    pub fn push_step(&mut self, step: ReasoningStep) {
        self.reasoning_steps.push(step);
    }

    /// 记录安全检查；输出检查必须在输入检查之后
    pub fn record_safety(&mut self, check: SafetyCheck) -> Result<(), EngineError> {
        let has_input = self
            .safety_checks
            .iter()
            .any(|c| c.phase == SafetyPhase::Input);
        match check.phase {
            SafetyPhase::Input if has_input => {
                return Err(EngineError::ProtocolViolation(
                    "input safety check recorded twice".to_string(),
                ))
            }
            SafetyPhase::Output if !has_input => {
                return Err(EngineError::ProtocolViolation(
                    "output safety check before input check".to_string(),
                ))
            }
            _ => {}
        }
        self.safety_checks.push(check);
        Ok(())
    }

    /// 追加检索证据（按 id 去重），返回新增条数
    pub fn append_evidence(&mut self, records: Vec<EvidenceRecord>) -> usize {
        let before = self.retrieved_data.len();
        for record in records {
            if !self.retrieved_data.iter().any(|r| r.id == record.id) {
                self.retrieved_data.push(record);
            }
        }
        self.retrieved_data.len() - before
    }

    /// 追加缓存洞察（按 kind + text 去重），返回新增条数
    pub fn append_insights(&mut self, insights: Vec<InsightRecord>) -> usize {
        let before = self.cached_insights.len();
        for insight in insights {
            if !self
                .cached_insights
                .iter()
                .any(|i| i.kind == insight.kind && i.text == insight.text)
            {
                self.cached_insights.push(insight);
            }
        }
        self.cached_insights.len() - before
    }

    pub fn push_observation(&mut self, observation: Observation) {
        self.should_continue = !observation.is_sufficient;
        self.observations.push(observation);
    }

    /// 强制结束循环：最后一条观察改记为充分
    pub fn force_sufficient(&mut self) {
        if let Some(last) = self.observations.last_mut() {
            last.is_sufficient = true;
        }
        self.should_continue = false;
    }

    pub fn record_retrieval_failure(&mut self) -> usize {
        self.consecutive_retrieval_failures += 1;
        self.consecutive_retrieval_failures
    }

    pub fn record_retrieval_success(&mut self) {
        self.consecutive_retrieval_failures = 0;
    }

    /// 最终回复只写一次
    pub fn set_response(&mut self, text: String) -> Result<(), EngineError> {
        if self.response.is_some() {
            return Err(EngineError::ProtocolViolation(
                "response already set".to_string(),
            ));
        }
        self.response = Some(text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input_check(block: bool) -> SafetyCheck {
        SafetyCheck {
            phase: SafetyPhase::Input,
            is_safe: !block,
            category: None,
            should_block: block,
            needs_modification: false,
            explanation: String::new(),
        }
    }

    #[test]
    fn test_empty_query_rejected() {
        assert!(matches!(
            AgentState::new("   ", 3),
            Err(EngineError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_transition_table() {
        let mut state = AgentState::new("sleep?", 3).unwrap();
        assert!(state.transition(EnginePhase::Reason).is_err());
        state.transition(EnginePhase::InputSafety).unwrap();
        state.transition(EnginePhase::Reason).unwrap();
        assert!(state.transition(EnginePhase::Synthesize).is_err());
        state.transition(EnginePhase::Act).unwrap();
        state.transition(EnginePhase::Observe).unwrap();
        state.transition(EnginePhase::Synthesize).unwrap();
        state.transition(EnginePhase::OutputSafety).unwrap();
        state.transition(EnginePhase::Modified).unwrap();
        assert!(state.phase().is_terminal());
        assert!(state.transition(EnginePhase::Reason).is_err());
    }

    #[test]
    fn test_iteration_ceiling() {
        let mut state = AgentState::new("sleep?", 2).unwrap();
        state.transition(EnginePhase::InputSafety).unwrap();
        state.transition(EnginePhase::Reason).unwrap();
        assert_eq!(state.begin_cycle().unwrap(), 1);
        assert_eq!(state.begin_cycle().unwrap(), 2);
        assert!(state.is_final_cycle());
        assert!(state.begin_cycle().is_err());
        assert_eq!(state.iteration_count(), 2);
    }

    #[test]
    fn test_safety_ordering_enforced() {
        let mut state = AgentState::new("sleep?", 3).unwrap();
        let mut output = input_check(false);
        output.phase = SafetyPhase::Output;
        assert!(state.record_safety(output.clone()).is_err());
        state.record_safety(input_check(false)).unwrap();
        assert!(state.record_safety(input_check(false)).is_err());
        state.record_safety(output).unwrap();
        assert_eq!(state.safety_checks().len(), 2);
    }

    #[test]
    fn test_response_set_once() {
        let mut state = AgentState::new("sleep?", 3).unwrap();
        state.set_response("a".to_string()).unwrap();
        assert!(state.set_response("b".to_string()).is_err());
        assert_eq!(state.response(), Some("a"));
    }

    #[test]
    fn test_evidence_dedup() {
        let mut state = AgentState::new("sleep?", 3).unwrap();
        let rec = |id: &str| EvidenceRecord::new(id, "slept 7h", 0.9);
        assert_eq!(state.append_evidence(vec![rec("a"), rec("b")]), 2);
        assert_eq!(state.append_evidence(vec![rec("b"), rec("c")]), 1);
        assert_eq!(state.retrieved_data().len(), 3);
    }

    #[test]
    fn test_force_sufficient_overrides_last_observation() {
        let mut state = AgentState::new("how did I sleep?", 3).unwrap();
        state.push_observation(Observation {
            text: "partial".to_string(),
            is_sufficient: false,
        });
        assert!(state.should_continue());
        state.force_sufficient();
        assert!(!state.should_continue());
        assert!(state.observations().last().unwrap().is_sufficient);
    }
}
