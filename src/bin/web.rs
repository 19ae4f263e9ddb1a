//! Lifelog Web API
//!
//! 启动: cargo run --bin lifelog-web --features web
//! 路由：POST /api/chat、POST /api/chat/stream (SSE)、GET /api/health、GET /api/stats、
//! GET /api/history?limit=N、DELETE /api/history

#![cfg(feature = "web")]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures_util::stream;
use serde::Deserialize;
use tokio::sync::mpsc;

use lifelog::config::load_config;
use lifelog::core::{Orchestrator, OrchestratorBuilder, ShutdownManager};
use lifelog::history::{ChatHistory, ChatMessage};
use lifelog::{process_message, process_message_stream, ChatResponse};

struct AppState {
    orch: Orchestrator,
    shutdown: Arc<ShutdownManager>,
    history: Arc<ChatHistory>,
}

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lifelog::observability::init();

    let config_path = std::env::var("LIFELOG_CONFIG").ok().map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        Default::default()
    });
    let orch = OrchestratorBuilder::from_config(&cfg)
        .context("Failed to assemble engine")?
        .build()
        .context("Failed to build engine")?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    let state = Arc::new(AppState {
        orch,
        shutdown: Arc::clone(&shutdown),
        history: Arc::new(ChatHistory::new(cfg.web.history_capacity)),
    });

    let app = Router::new()
        .route("/api/chat", post(api_chat))
        .route("/api/chat/stream", post(api_chat_stream))
        .route("/api/health", get(api_health))
        .route("/api/stats", get(api_stats))
        .route("/api/history", get(api_history).delete(api_clear_history))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&cfg.web.bind)
        .await
        .with_context(|| format!("bind {}", cfg.web.bind))?;
    tracing::info!("Lifelog API: http://{}", cfg.web.bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait_for_shutdown().await })
        .await?;

    Ok(())
}

/// POST /api/chat：同步返回完整结果
async fn api_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ChatResponse>) {
    let resp = process_message(&state.orch, &req.message).await;
    state.history.record_exchange(&req.message, &resp).await;
    let status = if resp.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(resp))
}

/// POST /api/chat/stream：SSE，每帧 `data: {type, node, data}`；客户端断开即取消运行
async fn api_chat_stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let (tx, rx) = mpsc::channel(state.orch.config().stream_buffer);
    let cancel = state.shutdown.request_token();
    let run_cancel = cancel.clone();
    let history = Arc::clone(&state.history);
    history.push(ChatMessage::user(req.message.as_str())).await;
    tokio::spawn(async move {
        if let Err(e) = process_message_stream(&state.orch, &req.message, tx, run_cancel).await {
            tracing::info!("Stream request ended early: {}", e);
        }
    });

    // 流被丢弃（客户端断开）时 guard 触发取消
    let guard = cancel.drop_guard();
    let event_stream = stream::unfold((rx, guard, history), |(mut rx, guard, history)| async move {
        let frame = rx.recv().await?;
        if let Some(reply) = ChatMessage::assistant_from_frame(&frame) {
            history.push(reply).await;
        }
        let event = Event::default().data(frame.to_json_line());
        Some((Ok(event), (rx, guard, history)))
    });
    Sse::new(event_stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    )
}

/// GET /api/health
async fn api_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let status = if state.shutdown.is_shutdown() {
        "shutting_down"
    } else {
        "healthy"
    };
    Json(serde_json::json!({
        "status": status,
        "model": state.orch.model(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// GET /api/stats：引擎参数与组件状态
async fn api_stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "engine": state.orch.config(),
        "model": state.orch.model(),
        "components": {
            "safetyGate": "active",
            "retrievalTool": "active",
            "insightCache": "active",
            "reasonPlanner": "active",
            "observer": "active",
            "synthesizer": "active",
        },
    }))
}

/// GET /api/history?limit=N：最近 N 条消息（按时间正序），缺省返回全部
async fn api_history(
    State(state): State<Arc<AppState>>,
    Query(q): Query<HistoryQuery>,
) -> Json<Vec<ChatMessage>> {
    Json(state.history.recent(q.limit.filter(|n| *n > 0)).await)
}

/// DELETE /api/history
async fn api_clear_history(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let cleared = state.history.clear().await;
    Json(serde_json::json!({
        "message": "Chat history cleared",
        "cleared": cleared,
    }))
}
