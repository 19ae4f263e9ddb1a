//! SafetyGate：对输入/输出文本做安全分类
//!
//! 单次调用超时；仅对瞬时错误立即重试一次；其余失败映射为 SafetyProviderError，由 RecoveryEngine 决定拦截策略。

use std::sync::Arc;
use std::time::Duration;

use crate::core::{EngineError, SafetyCheck, SafetyPhase};
use crate::safety::{SafetyProvider, SafetyProviderFailure, SafetyVerdict};

#[derive(Clone)]
pub struct SafetyGate {
    provider: Arc<dyn SafetyProvider>,
    timeout: Duration,
}

impl SafetyGate {
    pub fn new(provider: Arc<dyn SafetyProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    async fn classify_once(
        &self,
        text: &str,
        phase: SafetyPhase,
        context: Option<&str>,
    ) -> Result<SafetyVerdict, SafetyProviderFailure> {
        match tokio::time::timeout(self.timeout, self.provider.classify(text, phase, context)).await {
            Ok(result) => result,
            Err(_) => Err(SafetyProviderFailure::Fatal(format!(
                "classification timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }

    /// check(text, phase, context)：context 为输出检查时的原始问题
    pub async fn check(
        &self,
        text: &str,
        phase: SafetyPhase,
        context: Option<&str>,
    ) -> Result<SafetyVerdict, EngineError> {
        if text.trim().is_empty() {
            return Err(EngineError::InvalidRequest(
                "safety check needs non-empty text".to_string(),
            ));
        }

        let result = match self.classify_once(text, phase, context).await {
            Err(SafetyProviderFailure::Transient(reason)) => {
                tracing::warn!(?phase, "Transient safety classifier failure ({}), retrying once", reason);
                self.classify_once(text, phase, context).await
            }
            other => other,
        };

        let mut verdict = result.map_err(|e| EngineError::SafetyProviderError(e.to_string()))?;
        // 输入阶段不存在"标记但放行"
        if phase == SafetyPhase::Input && !verdict.is_safe {
            verdict.should_block = true;
            verdict.needs_modification = false;
        }
        tracing::debug!(
            ?phase,
            is_safe = verdict.is_safe,
            should_block = verdict.should_block,
            category = verdict.category.as_deref().unwrap_or("-"),
            "safety verdict"
        );
        Ok(verdict)
    }
}

impl SafetyCheck {
    pub fn from_verdict(phase: SafetyPhase, verdict: &SafetyVerdict) -> Self {
        Self {
            phase,
            is_safe: verdict.is_safe,
            category: verdict.category.clone(),
            should_block: verdict.should_block,
            needs_modification: verdict.needs_modification,
            explanation: verdict.explanation.clone(),
        }
    }
}
