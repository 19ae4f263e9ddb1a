//! 核心编排层：错误与恢复、状态机、编排器、构建器

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod shutdown;
pub mod state;

pub use builder::{create_llm_from_config, OrchestratorBuilder};
pub use error::{EngineError, RecoveryAction};
pub use orchestrator::{
    rejection_message, EngineConfig, Orchestrator, RunOutcome, CAUTION_NOTE,
    OUTPUT_BLOCKED_MESSAGE,
};
pub use recovery::RecoveryEngine;
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{
    AgentState, EnginePhase, Observation, ReasoningStep, SafetyCheck, SafetyPhase, TerminalState,
};
