//! 引擎错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 EngineError 决定 FailClosed / DegradeEvidence / DefaultAction / DegradedResponse / Abort 等。

use thiserror::Error;

use crate::core::state::EnginePhase;
use crate::llm::LlmError;

/// 编排过程中可能出现的错误（安全分类、检索、协议违规、生成超时等）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// 安全分类器本身失败（按策略 fail closed）
    #[error("Safety provider failed: {0}")]
    SafetyProviderError(String),

    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// 组件返回了协议之外的值（如未知的 nextAction）
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Generation timed out: {0}")]
    GenerationTimeout(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Synthesis failed: {0}")]
    SynthesisFailure(String),

    /// 无法构造 AgentState（如空消息），以 success=false 返回
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Illegal transition: {from:?} -> {to:?}")]
    IllegalTransition { from: EnginePhase, to: EnginePhase },

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl EngineError {
    /// LLM 调用失败映射：超时 → GenerationTimeout，其它 → GenerationFailed
    pub fn from_llm(component: &str, err: LlmError) -> Self {
        match err {
            LlmError::Timeout(secs) => {
                EngineError::GenerationTimeout(format!("{component} exceeded {secs}s"))
            }
            other => EngineError::GenerationFailed(format!("{component}: {other}")),
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 视为不安全并拦截
    FailClosed,
    /// 标记风险但放行（safety_fail_closed = false）
    FlagAndContinue,
    /// 本轮证据不足，交给 Observer 决定是否重试
    DegradeEvidence,
    /// 回退到最安全的枚举动作并记录警告
    DefaultAction,
    /// 组件降级（Planner 默认检索 / Observer 视为不充分）
    ComponentFallback,
    /// 返回固定的降级回复
    DegradedResponse,
    /// 终止当前请求
    Abort,
}

impl RecoveryAction {
    /// 事件与日志中的名字
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryAction::FailClosed => "fail_closed",
            RecoveryAction::FlagAndContinue => "flag_and_continue",
            RecoveryAction::DegradeEvidence => "degrade_evidence",
            RecoveryAction::DefaultAction => "default_action",
            RecoveryAction::ComponentFallback => "component_fallback",
            RecoveryAction::DegradedResponse => "degraded_response",
            RecoveryAction::Abort => "abort",
        }
    }
}
