//! Mock LLM 客户端（用于本地离线运行与测试，无需 API）
//!
//! 根据 prompt 中的协议标记识别调用方（安全分类 / 规划 / 观察 / 合成），按相应行协议给出确定性回复，
//! 便于在没有 API Key 时跑通完整编排流程。

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message, Role};
use crate::react::prompts::{
    ACTION_KEY, EVIDENCE_MARKER, INPUT_MARKER, OUTPUT_MARKER, SUFFICIENT_KEY,
};

/// prompt 所属的调用方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    InputSafety,
    OutputSafety,
    Plan,
    Observe,
    Synthesis,
    Other,
}

/// 按协议标记识别 prompt 类型；顺序固定，合成 prompt 内含观察文本，需先于 Plan/Observe 判断
pub fn classify_prompt(prompt: &str) -> PromptKind {
    if prompt.contains(OUTPUT_MARKER) {
        PromptKind::OutputSafety
    } else if prompt.contains(INPUT_MARKER) {
        PromptKind::InputSafety
    } else if prompt.contains(EVIDENCE_MARKER) {
        PromptKind::Synthesis
    } else if prompt.contains(ACTION_KEY) {
        PromptKind::Plan
    } else if prompt.contains(SUFFICIENT_KEY) {
        PromptKind::Observe
    } else {
        PromptKind::Other
    }
}

/// 取最后一条 User 消息作为 prompt
pub fn last_user_prompt(messages: &[Message]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| matches!(m.role, Role::User))
        .map(|m| m.content.as_str())
        .unwrap_or("")
}

const BLOCKED_TERMS: &[(&str, &str)] = &[
    ("prescribe", "medical_advice"),
    ("diagnose", "medical_advice"),
    ("medication", "medical_advice"),
    ("dosage", "medical_advice"),
    ("invest", "financial_advice"),
    ("stock tip", "financial_advice"),
    ("kill myself", "self_harm"),
    ("suicide", "self_harm"),
    ("home address", "privacy_violation"),
];

/// Mock 客户端：按 prompt 类型返回确定性的行协议回复
#[derive(Debug, Default)]
pub struct MockLlmClient;

impl MockLlmClient {
    fn input_safety(prompt: &str) -> String {
        let lower = prompt.to_lowercase();
        match BLOCKED_TERMS.iter().find(|(term, _)| lower.contains(term)) {
            Some((term, category)) => format!(
                "SAFE: NO\nCATEGORY: {category}\nSEVERITY: HIGH\nEXPLANATION: Input mentions '{term}'.\nACTION: BLOCK"
            ),
            None => "SAFE: YES\nCATEGORY: safe\nSEVERITY: NONE\nEXPLANATION: General lifelog question.\nACTION: ALLOW".to_string(),
        }
    }

    fn plan(prompt: &str) -> String {
        let has_evidence = !prompt.contains("EVIDENCE COLLECTED: 0 records");
        if has_evidence {
            "REASONING: Lifelog entries are already collected.\nNEXT_ACTION: sufficient\nACTION_DETAILS: none\nCONFIDENCE: HIGH".to_string()
        } else {
            "REASONING: No lifelog entries yet; search the log.\nNEXT_ACTION: retrieve_data\nACTION_DETAILS: \nCONFIDENCE: MEDIUM".to_string()
        }
    }

    fn observe(prompt: &str) -> String {
        let failed = prompt.contains("Retrieval unavailable") || prompt.contains("Retrieved 0 ");
        if failed {
            "OBSERVATION: Nothing useful came back.\nSUFFICIENT: NO\nNEXT_STEP: need_different_approach\nREASONING: No evidence yet.".to_string()
        } else {
            "OBSERVATION: Relevant entries were found.\nSUFFICIENT: YES\nNEXT_STEP: ready_to_synthesize\nREASONING: Enough evidence to answer.".to_string()
        }
    }

    fn synthesize(prompt: &str) -> String {
        let entries: Vec<&str> = prompt
            .lines()
            .filter(|l| l.trim_start().starts_with("Entry "))
            .take(3)
            .collect();
        if entries.is_empty() {
            "I couldn't find lifelog entries related to your question. Try logging a few more days and ask again.".to_string()
        } else {
            format!(
                "Here is what your lifelog shows:\n{}\n\nRecommendation: keep logging consistently so patterns become clearer.",
                entries.join("\n")
            )
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let prompt = last_user_prompt(messages);
        let reply = match classify_prompt(prompt) {
            PromptKind::InputSafety => Self::input_safety(prompt),
            PromptKind::OutputSafety => {
                "SAFE: YES\nISSUES: none\nSEVERITY: NONE\nRECOMMENDATION: ALLOW".to_string()
            }
            PromptKind::Plan => Self::plan(prompt),
            PromptKind::Observe => Self::observe(prompt),
            PromptKind::Synthesis => Self::synthesize(prompt),
            PromptKind::Other => format!("Echo from Mock: {}", prompt),
        };
        Ok(reply)
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}
