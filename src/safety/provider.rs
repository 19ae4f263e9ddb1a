//! SafetyProvider：安全分类能力抽象与基于 LLM 的行协议实现
//!
//! 输入检查：`SAFE / CATEGORY / SEVERITY / EXPLANATION / ACTION`；
//! 输出检查：`SAFE / ISSUES / SEVERITY / RECOMMENDATION`。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::core::SafetyPhase;
use crate::llm::{LlmClient, LlmError};
use crate::react::prompts::{self, extract_field};

/// 可识别的不安全类别
pub const UNSAFE_CATEGORIES: &[&str] = &[
    "illegal_activity",
    "violence",
    "self_harm",
    "harassment",
    "hate_speech",
    "sexual_content",
    "privacy_violation",
    "medical_advice",
    "financial_advice",
    "dangerous_content",
];

/// 分类器失败时使用的类别
pub const UNKNOWN_CATEGORY: &str = "unknown_error";

/// 一次分类结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyVerdict {
    pub is_safe: bool,
    pub category: Option<String>,
    pub should_block: bool,
    pub needs_modification: bool,
    pub explanation: String,
}

impl SafetyVerdict {
    pub fn safe(explanation: impl Into<String>) -> Self {
        Self {
            is_safe: true,
            category: None,
            should_block: false,
            needs_modification: false,
            explanation: explanation.into(),
        }
    }

    /// 分类器不可用时的拦截结果
    pub fn fail_closed(reason: impl Into<String>) -> Self {
        Self {
            is_safe: false,
            category: Some(UNKNOWN_CATEGORY.to_string()),
            should_block: true,
            needs_modification: false,
            explanation: reason.into(),
        }
    }

    /// 输入阶段分类器不可用且配置为放行：结论未知，准入但不标记为需修改
    pub fn admitted_unknown(reason: impl Into<String>) -> Self {
        Self {
            is_safe: true,
            category: Some(UNKNOWN_CATEGORY.to_string()),
            should_block: false,
            needs_modification: false,
            explanation: reason.into(),
        }
    }

    /// 输出阶段分类器不可用但配置为放行：标记风险，不拦截
    pub fn flagged_unknown(reason: impl Into<String>) -> Self {
        Self {
            is_safe: false,
            category: Some(UNKNOWN_CATEGORY.to_string()),
            should_block: false,
            needs_modification: true,
            explanation: reason.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SafetyProviderFailure {
    /// 网络抖动、限流：允许立即重试一次
    #[error("transient classifier failure: {0}")]
    Transient(String),

    #[error("classifier failure: {0}")]
    Fatal(String),
}

impl From<LlmError> for SafetyProviderFailure {
    fn from(err: LlmError) -> Self {
        if err.is_transient() {
            SafetyProviderFailure::Transient(err.to_string())
        } else {
            SafetyProviderFailure::Fatal(err.to_string())
        }
    }
}

/// 外部安全分类能力
#[async_trait]
pub trait SafetyProvider: Send + Sync {
    async fn classify(
        &self,
        text: &str,
        phase: SafetyPhase,
        context: Option<&str>,
    ) -> Result<SafetyVerdict, SafetyProviderFailure>;
}

/// 将类别文本规范化为 snake_case；"safe"/"none" 视为无类别
fn normalize_category(raw: &str) -> Option<String> {
    let normalized: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    let normalized = normalized.trim_matches('_').to_string();
    match normalized.as_str() {
        "" | "safe" | "none" | "n_a" => None,
        _ => Some(normalized),
    }
}

/// 从自由文本（ISSUES 行）中推断类别
fn infer_category(issues: &str) -> Option<String> {
    let lower = issues.to_lowercase();
    if let Some(known) = UNSAFE_CATEGORIES
        .iter()
        .find(|c| lower.contains(*c) || lower.contains(&c.replace('_', " ")))
    {
        return Some(known.to_string());
    }
    let keyword = [
        ("medical", "medical_advice"),
        ("diagnos", "medical_advice"),
        ("financial", "financial_advice"),
        ("invest", "financial_advice"),
        ("privacy", "privacy_violation"),
        ("self-harm", "self_harm"),
        ("harm", "dangerous_content"),
    ];
    keyword
        .iter()
        .find(|(k, _)| lower.contains(k))
        .map(|(_, c)| c.to_string())
}

fn is_yes(value: Option<&str>) -> Option<bool> {
    let v = value?.trim().to_uppercase();
    if v.starts_with("YES") {
        Some(true)
    } else if v.starts_with("NO") {
        Some(false)
    } else {
        None
    }
}

/// 解析输入检查回复；输入阶段的不安全一律拦截
pub fn parse_input_verdict(reply: &str) -> Result<SafetyVerdict, SafetyProviderFailure> {
    let safe = is_yes(extract_field(reply, "SAFE").as_deref());
    let action = extract_field(reply, "ACTION").map(|a| a.to_uppercase());
    let block_action = action.as_deref().map(|a| a.starts_with("BLOCK"));
    let (safe, block) = match (safe, block_action) {
        (None, None) => {
            return Err(SafetyProviderFailure::Fatal(
                "classifier reply has neither SAFE nor ACTION".to_string(),
            ))
        }
        (Some(safe), block) => (safe, block.unwrap_or(!safe)),
        (None, Some(block)) => (!block, block),
    };
    let is_safe = safe && !block;
    let category = if is_safe {
        None
    } else {
        extract_field(reply, "CATEGORY")
            .and_then(|c| normalize_category(&c))
            .or_else(|| Some("dangerous_content".to_string()))
    };
    Ok(SafetyVerdict {
        is_safe,
        category,
        should_block: !is_safe,
        needs_modification: false,
        explanation: extract_field(reply, "EXPLANATION").unwrap_or_default(),
    })
}

/// 解析输出检查回复：BLOCK 拦截，MODIFY 或 SAFE:NO+ALLOW 标记为需要警示
pub fn parse_output_verdict(reply: &str) -> Result<SafetyVerdict, SafetyProviderFailure> {
    let safe = is_yes(extract_field(reply, "SAFE").as_deref());
    let recommendation = extract_field(reply, "RECOMMENDATION").map(|r| r.to_uppercase());
    if safe.is_none() && recommendation.is_none() {
        return Err(SafetyProviderFailure::Fatal(
            "classifier reply has neither SAFE nor RECOMMENDATION".to_string(),
        ));
    }
    let should_block = recommendation
        .as_deref()
        .is_some_and(|r| r.starts_with("BLOCK"));
    let modify = recommendation
        .as_deref()
        .is_some_and(|r| r.starts_with("MODIFY"));
    let is_safe = safe.unwrap_or(!should_block && !modify) && !should_block && !modify;
    let issues = extract_field(reply, "ISSUES").unwrap_or_default();
    let category = if is_safe {
        None
    } else {
        infer_category(&issues).or_else(|| Some("flagged_content".to_string()))
    };
    Ok(SafetyVerdict {
        is_safe,
        category,
        should_block,
        needs_modification: !is_safe && !should_block,
        explanation: issues,
    })
}

/// 以 LLM 为分类器的 SafetyProvider
pub struct LlmSafetyProvider {
    llm: Arc<dyn LlmClient>,
}

impl LlmSafetyProvider {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl SafetyProvider for LlmSafetyProvider {
    async fn classify(
        &self,
        text: &str,
        phase: SafetyPhase,
        context: Option<&str>,
    ) -> Result<SafetyVerdict, SafetyProviderFailure> {
        match phase {
            SafetyPhase::Input => {
                let reply = self
                    .llm
                    .generate(prompts::INPUT_SAFETY_SYSTEM, &prompts::input_safety_prompt(text))
                    .await?;
                parse_input_verdict(&reply)
            }
            SafetyPhase::Output => {
                let prompt = prompts::output_safety_prompt(text, context.unwrap_or(""));
                let reply = self
                    .llm
                    .generate(prompts::OUTPUT_SAFETY_SYSTEM, &prompt)
                    .await?;
                parse_output_verdict(&reply)
            }
        }
    }
}
