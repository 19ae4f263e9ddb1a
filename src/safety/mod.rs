//! 安全闸门：每个请求在输入与输出各检查一次

pub mod gate;
pub mod provider;

pub use gate::SafetyGate;
pub use provider::{
    parse_input_verdict, parse_output_verdict, LlmSafetyProvider, SafetyProvider,
    SafetyProviderFailure, SafetyVerdict, UNKNOWN_CATEGORY, UNSAFE_CATEGORIES,
};
