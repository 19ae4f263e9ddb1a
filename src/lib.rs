//! Lifelog - 个人生活日志智能体编排引擎
//!
//! 模块划分：
//! - **agent**: 无头运行时（同步 ChatResponse / 流式 StreamFrame），供 CLI 与 HTTP 调用
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 状态机、编排器、错误与恢复、构建器
//! - **history**: Web 接口使用的有界会话历史
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / NVIDIA / Mock）
//! - **observability**: 日志初始化
//! - **react**: Planner、Observer、Synthesizer 与 ReAct 过程事件
//! - **retrieval**: 语义检索工具与预计算洞察缓存
//! - **safety**: 输入/输出安全闸门

pub mod agent;
pub mod config;
pub mod core;
pub mod history;
pub mod llm;
pub mod observability;
pub mod react;
pub mod retrieval;
pub mod safety;

pub use crate::agent::{process_message, process_message_stream, ChatResponse, StreamFrame};
pub use crate::core::{Orchestrator, OrchestratorBuilder};
