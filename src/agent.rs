//! Headless 运行时
//!
//! 供 CLI 与 HTTP 服务调用的无界面入口：
//! process_message 跑完整流程并返回 ChatResponse；
//! process_message_stream 通过有界通道逐帧推送 StreamFrame（intermediate* 后接唯一的 final 或 error）。

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::{
    EngineError, Orchestrator, ReasoningStep, RunOutcome, SafetyCheck, TerminalState,
};
use crate::react::ReactEvent;

/// 同步接口的响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub success: bool,
    pub response: String,
    pub reasoning_steps: Vec<ReasoningStep>,
    pub safety_checks: Vec<SafetyCheck>,
    pub react_cycles: usize,
    pub retrieved_entries: usize,
    pub elapsed_time_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_state: Option<TerminalState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatResponse {
    pub fn from_outcome(outcome: &RunOutcome) -> Self {
        Self {
            success: true,
            response: outcome.response().to_string(),
            reasoning_steps: outcome.state.reasoning_steps().to_vec(),
            safety_checks: outcome.state.safety_checks().to_vec(),
            react_cycles: outcome.state.iteration_count(),
            retrieved_entries: outcome.state.retrieved_data().len(),
            elapsed_time_seconds: outcome.elapsed.as_secs_f64(),
            terminal_state: Some(outcome.terminal),
            error: None,
        }
    }

    /// 无法开始运行（如空消息）时的失败响应
    pub fn failure(err: &EngineError, elapsed: Duration) -> Self {
        Self {
            success: false,
            response: String::new(),
            reasoning_steps: Vec::new(),
            safety_checks: Vec::new(),
            react_cycles: 0,
            retrieved_entries: 0,
            elapsed_time_seconds: elapsed.as_secs_f64(),
            terminal_state: None,
            error: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Intermediate,
    Final,
    Error,
}

/// 恢复动作说明（intermediate 帧）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryNote {
    pub action: String,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_steps: Option<Vec<ReasoningStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_checks: Option<Vec<SafetyCheck>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryNote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub react_cycles: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieved_entries: Option<usize>,
}

/// 流式接口的一帧
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFrame {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<FrameData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_time_seconds: Option<f64>,
}

impl StreamFrame {
    pub fn intermediate(event: &ReactEvent) -> Self {
        let data = match event {
            ReactEvent::Step {
                step, safety_check, ..
            } => FrameData {
                reasoning_steps: Some(vec![step.clone()]),
                safety_checks: safety_check.clone().map(|c| vec![c]),
                ..FrameData::default()
            },
            ReactEvent::Recovered { action, detail, .. } => FrameData {
                recovery: Some(RecoveryNote {
                    action: action.clone(),
                    detail: detail.clone(),
                }),
                ..FrameData::default()
            },
        };
        Self {
            kind: FrameKind::Intermediate,
            node: Some(event.node().to_string()),
            data: Some(data),
            error: None,
            elapsed_time_seconds: None,
        }
    }

    pub fn final_frame(outcome: &RunOutcome) -> Self {
        Self {
            kind: FrameKind::Final,
            node: Some(outcome.terminal.phase().node().to_string()),
            data: Some(FrameData {
                response: Some(outcome.response().to_string()),
                reasoning_steps: Some(outcome.state.reasoning_steps().to_vec()),
                safety_checks: Some(outcome.state.safety_checks().to_vec()),
                recovery: None,
                react_cycles: Some(outcome.state.iteration_count()),
                retrieved_entries: Some(outcome.state.retrieved_data().len()),
            }),
            error: None,
            elapsed_time_seconds: Some(outcome.elapsed.as_secs_f64()),
        }
    }

    pub fn error(message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            kind: FrameKind::Error,
            node: None,
            data: None,
            error: Some(message.into()),
            elapsed_time_seconds: Some(elapsed.as_secs_f64()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind != FrameKind::Intermediate
    }

    /// 一帧的 JSON 文本（SSE data 或 NDJSON 行）；编码失败时退化为一帧 error
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({
                "type": "error",
                "error": format!("encode frame: {e}"),
            })
            .to_string()
        })
    }
}

/// 跑完整流程并返回最终结果
pub async fn process_message(orch: &Orchestrator, message: &str) -> ChatResponse {
    let started = Instant::now();
    match orch.run(message, None, &CancellationToken::new()).await {
        Ok(outcome) => ChatResponse::from_outcome(&outcome),
        Err(err) => ChatResponse::failure(&err, started.elapsed()),
    }
}

/// 流式运行：引擎事件经有界通道转为 intermediate 帧，最后发送一帧 final 或 error。
/// 接收端关闭时取消运行；取消后不再发送任何帧，返回 Cancelled。
pub async fn process_message_stream(
    orch: &Orchestrator,
    message: &str,
    frames: mpsc::Sender<StreamFrame>,
    cancel: CancellationToken,
) -> Result<(), EngineError> {
    let started = Instant::now();
    let (event_tx, mut event_rx) = mpsc::channel::<ReactEvent>(orch.config().stream_buffer);

    let run_cancel = cancel.clone();
    let run = async move {
        // event_tx 随运行结束被丢弃，转发循环随之退出
        orch.run(message, Some(&event_tx), &run_cancel).await
    };
    let forward = async {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = event_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            // 取消后已缓冲的事件一律丢弃；消费端不读时也不阻塞在 send 上
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                sent = frames.send(StreamFrame::intermediate(&event)) => sent,
            };
            if sent.is_err() {
                tracing::info!("Stream consumer gone, cancelling run");
                cancel.cancel();
                break;
            }
        }
    };
    let (result, ()) = tokio::join!(run, forward);

    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    let last = match result {
        Ok(outcome) => StreamFrame::final_frame(&outcome),
        Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
        Err(err) => StreamFrame::error(err.to_string(), started.elapsed()),
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
        sent = frames.send(last) => sent.map_err(|_| EngineError::Cancelled),
    }
}
