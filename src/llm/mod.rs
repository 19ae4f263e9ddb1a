//! LLM 层：客户端抽象与实现（OpenAI 兼容 / NVIDIA / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::{classify_prompt, last_user_prompt, MockLlmClient, PromptKind};
pub use openai::OpenAiClient;
pub use traits::{generate_within, LlmClient, LlmError, Message, Role};
