//! Synthesizer：基于全部证据生成最终回复

use std::sync::Arc;
use std::time::Duration;

use crate::core::{EngineError, Observation};
use crate::llm::{generate_within, LlmClient};
use crate::react::prompts;
use crate::retrieval::{EvidenceRecord, InsightRecord};

/// 合成失败时交付给用户的固定回复
pub const DEGRADED_MESSAGE: &str =
    "I'm having trouble generating a full answer right now. Please try again in a moment.";

pub struct Synthesizer {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
}

fn format_evidence(evidence: &[EvidenceRecord]) -> String {
    if evidence.is_empty() {
        return "No lifelog entries were retrieved.".to_string();
    }
    evidence
        .iter()
        .enumerate()
        .map(|(i, r)| match r.metadata.get("date") {
            Some(date) => format!("Entry {} ({}): {}", i + 1, date, r.text),
            None => format!("Entry {}: {}", i + 1, r.text),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_insights(insights: &[InsightRecord]) -> String {
    if insights.is_empty() {
        return "None available.".to_string();
    }
    insights
        .iter()
        .map(|i| format!("- [{:?}/{}] {}", i.kind, i.topic, i.text))
        .collect::<Vec<_>>()
        .join("\n")
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// 失败（超时、Provider 错误、空回复）统一为 SynthesisFailure，由编排器降级
    pub async fn synthesize(
        &self,
        query: &str,
        evidence: &[EvidenceRecord],
        insights: &[InsightRecord],
        observations: &[Observation],
    ) -> Result<String, EngineError> {
        let trail = observations
            .iter()
            .enumerate()
            .map(|(i, o)| format!("{}. {}", i + 1, o.text))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = prompts::synthesis_prompt(
            query,
            &format_evidence(evidence),
            &format_insights(insights),
            &trail,
        );
        let reply = generate_within(self.llm.as_ref(), prompts::SYNTHESIS_SYSTEM, &prompt, self.timeout)
            .await
            .map_err(|e| EngineError::SynthesisFailure(e.to_string()))?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(EngineError::SynthesisFailure("empty response".to_string()));
        }
        Ok(reply.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, Message, MockLlmClient};
    use async_trait::async_trait;

    struct BlankClient;

    #[async_trait]
    impl LlmClient for BlankClient {
        async fn complete(&self, _messages: &[Message]) -> Result<String, LlmError> {
            Ok("   ".to_string())
        }
    }

    #[test]
    fn test_format_evidence_numbers_entries() {
        let text = format_evidence(&[
            EvidenceRecord::new("a", "slept 7h", 0.9).with_metadata("date", "2025-10-20"),
            EvidenceRecord::new("b", "slept 5h", 0.7),
        ]);
        assert_eq!(text, "Entry 1 (2025-10-20): slept 7h\nEntry 2: slept 5h");
    }

    #[tokio::test]
    async fn test_synthesize_with_mock_quotes_entries() {
        let synth = Synthesizer::new(Arc::new(MockLlmClient), Duration::from_secs(5));
        let out = synth
            .synthesize("sleep?", &[EvidenceRecord::new("a", "slept 7h", 0.9)], &[], &[])
            .await
            .unwrap();
        assert!(out.contains("Entry 1: slept 7h"));
    }

    #[tokio::test]
    async fn test_blank_reply_is_failure() {
        let synth = Synthesizer::new(Arc::new(BlankClient), Duration::from_secs(5));
        let err = synth.synthesize("sleep?", &[], &[], &[]).await.unwrap_err();
        assert!(matches!(err, EngineError::SynthesisFailure(_)));
    }
}
