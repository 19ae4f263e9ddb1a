//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / NVIDIA / Mock）实现 LlmClient；Planner、Observer、Synthesizer 与安全分类器只依赖 complete / generate。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// LLM 调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited")]
    RateLimited,

    #[error("api error: {0}")]
    Api(String),

    #[error("empty response")]
    EmptyResponse,
}

impl LlmError {
    /// 网络抖动与限流视为瞬时错误，调用方最多立即重试一次
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Network(_) | LlmError::RateLimited)
    }
}

/// LLM 客户端 trait（即 ReasoningProvider）：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// system + 单条 user prompt 的便捷调用
    async fn generate(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        let messages = [Message::system(system), Message::user(prompt)];
        self.complete(&messages).await
    }

    /// 模型名（日志用）
    fn model_name(&self) -> &str {
        "unknown"
    }
}

/// 在超时内调用 generate；超时映射为 LlmError::Timeout
pub async fn generate_within(
    llm: &dyn LlmClient,
    system: &str,
    prompt: &str,
    limit: Duration,
) -> Result<String, LlmError> {
    match tokio::time::timeout(limit, llm.generate(system, prompt)).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout(limit.as_secs())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowClient;

    #[async_trait]
    impl LlmClient for SlowClient {
        async fn complete(&self, _messages: &[Message]) -> Result<String, LlmError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(LlmError::Network("reset".into()).is_transient());
        assert!(LlmError::RateLimited.is_transient());
        assert!(!LlmError::Timeout(10).is_transient());
        assert!(!LlmError::Api("bad request".into()).is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_within_times_out() {
        let result = generate_within(&SlowClient, "sys", "hi", Duration::from_secs(1)).await;
        assert_eq!(result, Err(LlmError::Timeout(1)));
    }
}
