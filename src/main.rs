//! Lifelog CLI
//!
//! 用法：`lifelog [--config PATH] [--stream] <question...>`；未给出问题时从 stdin 读取。
//! 默认打印 ChatResponse JSON；`--stream` 时逐行打印 StreamFrame（NDJSON）。

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use lifelog::config::load_config;
use lifelog::core::{OrchestratorBuilder, ShutdownManager};
use lifelog::{process_message, process_message_stream, StreamFrame};
use tokio::sync::mpsc;

struct CliArgs {
    config: Option<PathBuf>,
    stream: bool,
    question: String,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut config = None;
    let mut stream = false;
    let mut words = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                config = Some(PathBuf::from(args.next().context("--config needs a path")?));
            }
            "--stream" => stream = true,
            _ => words.push(arg),
        }
    }
    let question = if words.is_empty() {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read question from stdin")?;
        buf.trim().to_string()
    } else {
        words.join(" ")
    };
    Ok(CliArgs {
        config,
        stream,
        question,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lifelog::observability::init();

    let args = parse_args()?;
    let cfg = load_config(args.config.clone()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        Default::default()
    });
    let orch = OrchestratorBuilder::from_config(&cfg)
        .context("Failed to assemble engine")?
        .build()
        .context("Failed to build engine")?;

    if !args.stream {
        let resp = process_message(&orch, &args.question).await;
        println!("{}", serde_json::to_string_pretty(&resp)?);
        return Ok(());
    }

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    let (tx, mut rx) = mpsc::channel::<StreamFrame>(cfg.engine.stream_buffer);
    let printer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            println!("{}", frame.to_json_line());
        }
    });
    let result = process_message_stream(&orch, &args.question, tx, shutdown.request_token()).await;
    printer.await.context("frame printer panicked")?;
    if let Err(e) = result {
        tracing::info!("Stream ended early: {}", e);
    }
    Ok(())
}
