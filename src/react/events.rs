//! ReAct 过程事件：编排器每次状态转换发出一条，供流式/SSE 展示与回放
//!
//! 顺序与 AgentState.reasoning_steps 一一对应（先记日志、再发事件、再转换），只凭事件流即可重建推理轨迹。

use serde::Serialize;

use crate::core::{ReasoningStep, SafetyCheck};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    /// 一条推理记录（与 reasoning_steps 同序）
    Step {
        node: String,
        iteration: usize,
        step: ReasoningStep,
        #[serde(skip_serializing_if = "Option::is_none")]
        safety_check: Option<SafetyCheck>,
    },
    /// 组件失败后的恢复动作（协议违规、检索不可用、合成降级等）
    Recovered {
        node: String,
        action: String,
        detail: String,
    },
}

impl ReactEvent {
    pub fn node(&self) -> &str {
        match self {
            ReactEvent::Step { node, .. } | ReactEvent::Recovered { node, .. } => node,
        }
    }
}

/// 从事件流回放推理轨迹
pub fn replay_steps<'a>(events: impl IntoIterator<Item = &'a ReactEvent>) -> Vec<ReasoningStep> {
    events
        .into_iter()
        .filter_map(|e| match e {
            ReactEvent::Step { step, .. } => Some(step.clone()),
            ReactEvent::Recovered { .. } => None,
        })
        .collect()
}
