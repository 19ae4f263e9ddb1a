//! 错误恢复引擎
//!
//! 根据 EngineError 类型返回 RecoveryAction，供编排器决定是拦截、降级、回退默认动作还是终止。

use crate::core::{EngineError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    safety_fail_closed: bool,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(true)
    }
}

impl RecoveryEngine {
    pub fn new(safety_fail_closed: bool) -> Self {
        Self { safety_fail_closed }
    }

    pub fn handle(&self, err: &EngineError) -> RecoveryAction {
        match err {
            EngineError::SafetyProviderError(_) => {
                if self.safety_fail_closed {
                    RecoveryAction::FailClosed
                } else {
                    RecoveryAction::FlagAndContinue
                }
            }
            EngineError::RetrievalUnavailable(_) => RecoveryAction::DegradeEvidence,
            EngineError::ProtocolViolation(_) => RecoveryAction::DefaultAction,
            EngineError::GenerationTimeout(_) | EngineError::GenerationFailed(_) => {
                RecoveryAction::ComponentFallback
            }
            EngineError::SynthesisFailure(_) => RecoveryAction::DegradedResponse,
            EngineError::InvalidRequest(_)
            | EngineError::IllegalTransition { .. }
            | EngineError::Cancelled
            | EngineError::ConfigError(_) => RecoveryAction::Abort,
        }
    }
}
