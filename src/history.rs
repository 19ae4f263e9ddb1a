//! 会话历史：进程内的有界对话记录
//!
//! 每次请求记一条 user 消息，成功时再记一条带推理轨迹与指标的 assistant 消息。
//! 超过容量时丢弃最旧的消息，仅供 Web 接口的 /api/history 查询与清空。

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::agent::{ChatResponse, FrameKind, StreamFrame};
use crate::core::{ReasoningStep, SafetyCheck};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// assistant 轮次的运行指标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnMetrics {
    pub react_cycles: usize,
    pub retrieved_entries: usize,
    pub elapsed_time_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_steps: Option<Vec<ReasoningStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_checks: Option<Vec<SafetyCheck>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<TurnMetrics>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            timestamp: Utc::now(),
            reasoning_steps: None,
            safety_checks: None,
            metrics: None,
        }
    }

    /// 同步响应对应的 assistant 消息；失败响应不入历史
    pub fn assistant_from_response(resp: &ChatResponse) -> Option<Self> {
        if !resp.success {
            return None;
        }
        Some(Self {
            role: ChatRole::Assistant,
            content: resp.response.clone(),
            timestamp: Utc::now(),
            reasoning_steps: Some(resp.reasoning_steps.clone()),
            safety_checks: Some(resp.safety_checks.clone()),
            metrics: Some(TurnMetrics {
                react_cycles: resp.react_cycles,
                retrieved_entries: resp.retrieved_entries,
                elapsed_time_seconds: resp.elapsed_time_seconds,
            }),
        })
    }

    /// 流式接口的 final 帧对应的 assistant 消息
    pub fn assistant_from_frame(frame: &StreamFrame) -> Option<Self> {
        if frame.kind != FrameKind::Final {
            return None;
        }
        let data = frame.data.as_ref()?;
        Some(Self {
            role: ChatRole::Assistant,
            content: data.response.clone().unwrap_or_default(),
            timestamp: Utc::now(),
            reasoning_steps: data.reasoning_steps.clone(),
            safety_checks: data.safety_checks.clone(),
            metrics: Some(TurnMetrics {
                react_cycles: data.react_cycles.unwrap_or_default(),
                retrieved_entries: data.retrieved_entries.unwrap_or_default(),
                elapsed_time_seconds: frame.elapsed_time_seconds.unwrap_or_default(),
            }),
        })
    }
}

/// 有界历史；读写均经 RwLock，可在多个请求间共享
pub struct ChatHistory {
    messages: RwLock<VecDeque<ChatMessage>>,
    capacity: usize,
}

impl ChatHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn push(&self, msg: ChatMessage) {
        let mut messages = self.messages.write().await;
        messages.push_back(msg);
        while messages.len() > self.capacity {
            messages.pop_front();
        }
    }

    /// 记录一次同步请求：user 消息 + 成功时的 assistant 消息
    pub async fn record_exchange(&self, message: &str, resp: &ChatResponse) {
        self.push(ChatMessage::user(message)).await;
        if let Some(reply) = ChatMessage::assistant_from_response(resp) {
            self.push(reply).await;
        }
    }

    /// 最近 limit 条（按时间正序）；None 返回全部
    pub async fn recent(&self, limit: Option<usize>) -> Vec<ChatMessage> {
        let messages = self.messages.read().await;
        let skip = limit.map_or(0, |n| messages.len().saturating_sub(n));
        messages.iter().skip(skip).cloned().collect()
    }

    /// 清空并返回被清除的条数
    pub async fn clear(&self) -> usize {
        let mut messages = self.messages.write().await;
        let n = messages.len();
        messages.clear();
        n
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
