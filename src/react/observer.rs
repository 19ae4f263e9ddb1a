//! Observer：动作结果反思，判断证据是否充分
//!
//! 检索失败且尚非最后一轮时直接判定不充分（不调用 LLM），让 Planner 换一种检索方式；
//! 最后一轮的强制合成由编排器负责，不在这里判断。

use std::sync::Arc;
use std::time::Duration;

use crate::core::{EngineError, Observation};
use crate::llm::{generate_within, LlmClient};
use crate::react::action::{ActionResult, ActionTag};
use crate::react::prompts::{self, extract_field};

pub struct Observer {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
}

/// 解析 `OBSERVATION / SUFFICIENT` 回复；SUFFICIENT 缺失视为不充分
pub fn parse_observation(reply: &str) -> Observation {
    let text = extract_field(reply, "OBSERVATION").unwrap_or_else(|| reply.trim().to_string());
    let is_sufficient = extract_field(reply, "SUFFICIENT")
        .map(|v| v.to_uppercase().starts_with("YES"))
        .unwrap_or(false);
    Observation { text, is_sufficient }
}

impl Observer {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    pub async fn reflect(
        &self,
        result: &ActionResult,
        query: &str,
        iteration: usize,
        max_iterations: usize,
    ) -> Result<Observation, EngineError> {
        if result.retrieval_failed() && iteration < max_iterations {
            return Ok(Observation {
                text: format!(
                    "Retrieval failed on cycle {iteration}; another attempt with a different formulation is needed."
                ),
                is_sufficient: false,
            });
        }
        if result.action == Some(ActionTag::Sufficient) {
            return Ok(Observation {
                text: "Planner judged the collected evidence sufficient.".to_string(),
                is_sufficient: true,
            });
        }

        let prompt = prompts::observe_prompt(&result.summary(), query, iteration, max_iterations);
        let reply = generate_within(self.llm.as_ref(), prompts::REACT_SYSTEM, &prompt, self.timeout)
            .await
            .map_err(|e| EngineError::from_llm("observer", e))?;
        Ok(parse_observation(&reply))
    }
}
