//! 编排器：输入安全 → {Reason → Act → Observe}* → Synthesize → 输出安全
//!
//! 每个请求独占一个 AgentState。每次状态转换按"先记日志、再发事件、再转换"的顺序执行；
//! 所有外部调用都可被 CancellationToken 打断，取消后不再发出任何事件。

use std::future::Future;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::core::{
    AgentState, EngineError, EnginePhase, Observation, ReasoningStep, RecoveryAction,
    RecoveryEngine, SafetyCheck, SafetyPhase, TerminalState,
};
use crate::react::{
    ActionResult, ActionTag, Observer, Plan, ReactEvent, ReasonPlanner, Synthesizer,
    DEGRADED_MESSAGE,
};
use crate::retrieval::{terms, topic_hints, InsightCache, RetrievalTool};
use crate::safety::{SafetyGate, SafetyVerdict, UNKNOWN_CATEGORY};

/// 输出被拦截时交付的固定回复
pub const OUTPUT_BLOCKED_MESSAGE: &str = "I generated an answer, but it did not pass the safety review, so I can't share it. \
Please rephrase your question or consult a qualified professional for advice on this topic.";

/// Modified 终态附加的警示说明
pub const CAUTION_NOTE: &str = "Note: this summary is based on your own lifelog entries and is not medical, \
financial, or mental-health advice. Please consult a qualified professional for decisions in those areas.";

/// 输入被拦截时的回复模板，包含被标记的类别
pub fn rejection_message(category: &str) -> String {
    format!(
        "I can't help with this request because it was flagged as {category}. \
For questions like this, please consult a qualified professional or appropriate support service."
    )
}

/// 引擎运行参数
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    pub max_iterations: usize,
    pub retrieval_limit: usize,
    /// 连续检索失败达到该次数后强制合成
    pub max_retrieval_failures: usize,
    pub safety_fail_closed: bool,
    /// 事件通道容量（背压）
    pub stream_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            retrieval_limit: 5,
            max_retrieval_failures: 2,
            safety_fail_closed: true,
            stream_buffer: 32,
        }
    }
}

/// 一次运行的结果
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: AgentState,
    pub terminal: TerminalState,
    /// 合成降级时的原始错误
    pub degraded: Option<String>,
    pub elapsed: Duration,
}

impl RunOutcome {
    pub fn response(&self) -> &str {
        self.state.response().unwrap_or_default()
    }
}

/// 单次运行上下文：状态 + 事件出口 + 取消信号
struct RunContext<'a> {
    state: AgentState,
    events: Option<&'a mpsc::Sender<ReactEvent>>,
    cancel: &'a CancellationToken,
}

impl RunContext<'_> {
    /// 在取消信号下等待外部调用
    async fn guarded<T>(&self, fut: impl Future<Output = T>) -> Result<T, EngineError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
            out = fut => Ok(out),
        }
    }

    /// 发送事件；接收端已关闭视为调用方断开
    async fn emit(&self, event: ReactEvent) -> Result<(), EngineError> {
        let Some(tx) = self.events else {
            return Ok(());
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
            sent = tx.send(event) => sent.map_err(|_| EngineError::Cancelled),
        }
    }

    /// 记日志并发事件，不做转换
    async fn record(&mut self, step: ReasoningStep, check: Option<SafetyCheck>) -> Result<(), EngineError> {
        self.state.push_step(step.clone());
        let event = ReactEvent::Step {
            node: self.state.phase().node().to_string(),
            iteration: self.state.iteration_count(),
            step,
            safety_check: check,
        };
        self.emit(event).await
    }

    /// 记日志、发事件、再转换
    async fn commit(
        &mut self,
        step: ReasoningStep,
        check: Option<SafetyCheck>,
        next: EnginePhase,
    ) -> Result<(), EngineError> {
        self.record(step, check).await?;
        tracing::debug!(from = ?self.state.phase(), to = ?next, "transition");
        self.state.transition(next)
    }

    async fn recovered(&self, action: &RecoveryAction, detail: impl Into<String>) -> Result<(), EngineError> {
        self.emit(ReactEvent::Recovered {
            node: self.state.phase().node().to_string(),
            action: action.as_str().to_string(),
            detail: detail.into(),
        })
        .await
    }
}

pub struct Orchestrator {
    pub(crate) safety: SafetyGate,
    pub(crate) retrieval: RetrievalTool,
    pub(crate) insights: InsightCache,
    pub(crate) planner: ReasonPlanner,
    pub(crate) observer: Observer,
    pub(crate) synthesizer: Synthesizer,
    pub(crate) recovery: RecoveryEngine,
    pub(crate) config: EngineConfig,
    pub(crate) model: String,
}

impl Orchestrator {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 推理模型名（统计接口用）
    pub fn model(&self) -> &str {
        &self.model
    }

    /// 运行一次请求；events 为 None 时不发事件
    pub async fn run(
        &self,
        query: &str,
        events: Option<&mpsc::Sender<ReactEvent>>,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, EngineError> {
        let span = tracing::info_span!("run", request_id = %Uuid::new_v4());
        let result = self.run_inner(query, events, cancel).instrument(span.clone()).await;
        if let Err(e) = &result {
            span.in_scope(|| match e {
                EngineError::Cancelled => tracing::info!("run cancelled"),
                other => tracing::warn!("run aborted: {}", other),
            });
        }
        result
    }

    async fn run_inner(
        &self,
        query: &str,
        events: Option<&mpsc::Sender<ReactEvent>>,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, EngineError> {
        let started = Instant::now();
        let state = AgentState::new(query, self.config.max_iterations)?;
        let query = state.query().to_string();
        tracing::info!(query = %query, "request started");

        let mut ctx = RunContext {
            state,
            events,
            cancel,
        };
        ctx.state.transition(EnginePhase::InputSafety)?;

        // 输入安全检查
        let verdict = self.check_safety(&ctx, &query, SafetyPhase::Input, None).await?;
        let check = SafetyCheck::from_verdict(SafetyPhase::Input, &verdict);
        ctx.state.record_safety(check.clone())?;
        if verdict.should_block {
            let category = verdict.category.as_deref().unwrap_or(UNKNOWN_CATEGORY);
            tracing::warn!(category, "input blocked");
            ctx.state.set_response(rejection_message(category))?;
            let step = ReasoningStep::new(
                "Input Safety Check",
                format!("Input blocked as {category}: {}", verdict.explanation),
            );
            ctx.commit(step, Some(check), EnginePhase::Blocked).await?;
            return Ok(self.finish(ctx.state, TerminalState::Blocked, None, started));
        }
        let step = ReasoningStep::new("Input Safety Check", "Input passed safety check");
        ctx.commit(step, Some(check), EnginePhase::Reason).await?;

        self.react_cycles(&mut ctx, &query).await?;

        // 合成
        let synthesis = ctx
            .guarded(self.synthesizer.synthesize(
                &query,
                ctx.state.retrieved_data(),
                ctx.state.cached_insights(),
                ctx.state.observations(),
            ))
            .await?;
        let (draft, degraded) = match synthesis {
            Ok(text) => (text, None),
            Err(err) => match self.recovery.handle(&err) {
                RecoveryAction::DegradedResponse => {
                    tracing::warn!("Synthesis failed ({}), delivering degraded message", err);
                    ctx.recovered(&RecoveryAction::DegradedResponse, err.to_string()).await?;
                    (DEGRADED_MESSAGE.to_string(), Some(err.to_string()))
                }
                _ => return Err(err),
            },
        };
        let description = match &degraded {
            None => format!(
                "Generated response from {} records and {} insights",
                ctx.state.retrieved_data().len(),
                ctx.state.cached_insights().len()
            ),
            Some(_) => "Synthesis failed; using degraded-service message".to_string(),
        };
        ctx.commit(
            ReasoningStep::new("Synthesize Response", description),
            None,
            EnginePhase::OutputSafety,
        )
        .await?;

        // 输出安全检查
        let verdict = self
            .check_safety(&ctx, &draft, SafetyPhase::Output, Some(&query))
            .await?;
        let check = SafetyCheck::from_verdict(SafetyPhase::Output, &verdict);
        ctx.state.record_safety(check.clone())?;
        let (terminal, response, description) = if verdict.should_block {
            let category = verdict.category.as_deref().unwrap_or(UNKNOWN_CATEGORY);
            tracing::warn!(category, "output blocked");
            (
                TerminalState::Blocked,
                OUTPUT_BLOCKED_MESSAGE.to_string(),
                format!("Response blocked as {category}"),
            )
        } else if !verdict.is_safe || verdict.needs_modification {
            (
                TerminalState::Modified,
                format!("{draft}\n\n{CAUTION_NOTE}"),
                "Response delivered with caution note".to_string(),
            )
        } else {
            (
                TerminalState::Delivered,
                draft,
                "Response passed safety check".to_string(),
            )
        };
        ctx.state.set_response(response)?;
        ctx.commit(
            ReasoningStep::new("Output Safety Check", description),
            Some(check),
            terminal.phase(),
        )
        .await?;

        Ok(self.finish(ctx.state, terminal, degraded, started))
    }

    fn finish(
        &self,
        state: AgentState,
        terminal: TerminalState,
        degraded: Option<String>,
        started: Instant,
    ) -> RunOutcome {
        let elapsed = started.elapsed();
        tracing::info!(
            terminal = ?terminal,
            cycles = state.iteration_count(),
            records = state.retrieved_data().len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "request finished"
        );
        RunOutcome {
            state,
            terminal,
            degraded,
            elapsed,
        }
    }

    /// 安全检查失败时按 RecoveryEngine 策略给出替代结论
    async fn check_safety(
        &self,
        ctx: &RunContext<'_>,
        text: &str,
        phase: SafetyPhase,
        context: Option<&str>,
    ) -> Result<SafetyVerdict, EngineError> {
        let err = match ctx.guarded(self.safety.check(text, phase, context)).await? {
            Ok(verdict) => return Ok(verdict),
            Err(err) => err,
        };
        let action = self.recovery.handle(&err);
        let verdict = match action {
            RecoveryAction::FailClosed => SafetyVerdict::fail_closed(err.to_string()),
            // "标记但放行"只属于输出阶段；输入阶段记为未知但准入
            RecoveryAction::FlagAndContinue => match phase {
                SafetyPhase::Input => SafetyVerdict::admitted_unknown(err.to_string()),
                SafetyPhase::Output => SafetyVerdict::flagged_unknown(err.to_string()),
            },
            _ => return Err(err),
        };
        tracing::warn!(?phase, action = action.as_str(), "Safety classifier failed: {}", err);
        ctx.recovered(&action, err.to_string()).await?;
        Ok(verdict)
    }

    /// ReAct 循环：结束时状态处于 Synthesize
    async fn react_cycles(&self, ctx: &mut RunContext<'_>, query: &str) -> Result<(), EngineError> {
        let max = self.config.max_iterations;
        loop {
            let cycle = ctx.state.begin_cycle()?;

            // Reason
            let plan = match ctx.guarded(self.planner.plan(&ctx.state)).await? {
                Ok(plan) => plan,
                Err(err) => match self.recovery.handle(&err) {
                    RecoveryAction::ComponentFallback => {
                        tracing::warn!(cycle, "Planner failed ({}), defaulting to retrieval", err);
                        ctx.recovered(&RecoveryAction::ComponentFallback, err.to_string()).await?;
                        Plan::fallback(&err.to_string())
                    }
                    _ => return Err(err),
                },
            };
            let action = match plan.next_action() {
                Ok(action) => action,
                Err(err) => match self.recovery.handle(&err) {
                    RecoveryAction::DefaultAction => {
                        tracing::warn!(cycle, "{}; defaulting to {}", err, ActionTag::fallback());
                        ctx.recovered(&RecoveryAction::DefaultAction, err.to_string()).await?;
                        ActionTag::fallback()
                    }
                    _ => return Err(err),
                },
            };
            let retrieval_query = match (&plan.details, action) {
                (Some(details), ActionTag::RetrieveData) => details.clone(),
                _ => query.to_string(),
            };
            let step = ReasoningStep::new(
                format!("Reason (Cycle {cycle})"),
                format!(
                    "{} Next action: {} (confidence: {:?})",
                    plan.reasoning, action, plan.confidence
                ),
            );
            ctx.commit(step, None, EnginePhase::Act).await?;

            // Act
            let result = self.act(ctx, action, &retrieval_query, query).await?;
            let description = self.absorb(ctx, &result, cycle).await?;
            ctx.commit(
                ReasoningStep::new(format!("Act (Cycle {cycle})"), description),
                None,
                EnginePhase::Observe,
            )
            .await?;

            // Observe
            let exhausted =
                ctx.state.consecutive_retrieval_failures() >= self.config.max_retrieval_failures;
            let observation = if exhausted {
                Observation {
                    text: format!(
                        "Retrieval failed {} consecutive times; proceeding with available evidence.",
                        ctx.state.consecutive_retrieval_failures()
                    ),
                    is_sufficient: false,
                }
            } else {
                match ctx
                    .guarded(self.observer.reflect(&result, query, cycle, max))
                    .await?
                {
                    Ok(observation) => observation,
                    Err(err) => match self.recovery.handle(&err) {
                        RecoveryAction::ComponentFallback => {
                            tracing::warn!(cycle, "Observer failed ({}), treating evidence as insufficient", err);
                            ctx.recovered(&RecoveryAction::ComponentFallback, err.to_string()).await?;
                            Observation {
                                text: "Observer unavailable; evidence treated as insufficient.".to_string(),
                                is_sufficient: false,
                            }
                        }
                        _ => return Err(err),
                    },
                }
            };
            let sufficient = observation.is_sufficient;
            let step = ReasoningStep::new(
                format!("Observe (Cycle {cycle})"),
                format!(
                    "{} Sufficient: {}",
                    observation.text,
                    if sufficient { "yes" } else { "no" }
                ),
            );
            ctx.state.push_observation(observation);

            if sufficient {
                return ctx.commit(step, None, EnginePhase::Synthesize).await;
            }
            let forced = if exhausted {
                Some("forced synthesis: retrieval unavailable")
            } else if ctx.state.is_final_cycle() {
                Some("forced synthesis: max cycles reached")
            } else {
                None
            };
            match forced {
                None => ctx.commit(step, None, EnginePhase::Reason).await?,
                Some(reason) => {
                    ctx.record(step, None).await?;
                    ctx.state.force_sufficient();
                    tracing::info!(cycle, "{}", reason);
                    return ctx
                        .commit(
                            ReasoningStep::new("Forced Synthesis", reason),
                            None,
                            EnginePhase::Synthesize,
                        )
                        .await;
                }
            }
        }
    }

    /// 执行动作；同一轮的检索与洞察查询并发进行
    async fn act(
        &self,
        ctx: &RunContext<'_>,
        action: ActionTag,
        retrieval_query: &str,
        query: &str,
    ) -> Result<ActionResult, EngineError> {
        let mut result = ActionResult::new(action, retrieval_query);
        let mut hints = topic_hints(query);
        for term in terms(retrieval_query) {
            if !hints.contains(&term) {
                hints.push(term);
            }
        }

        match action {
            ActionTag::RetrieveData => {
                let (search, insights) = ctx
                    .guarded(async {
                        tokio::join!(
                            self.retrieval.search(retrieval_query, self.config.retrieval_limit),
                            self.insights.lookup(&hints)
                        )
                    })
                    .await?;
                result.insights = insights;
                match search {
                    Ok(records) => result.records = records,
                    Err(err) => match self.recovery.handle(&err) {
                        RecoveryAction::DegradeEvidence => {
                            result.retrieval_error = Some(err.to_string());
                        }
                        _ => return Err(err),
                    },
                }
            }
            ActionTag::QueryInsights => {
                result.insights = ctx.guarded(self.insights.lookup(&hints)).await?;
            }
            ActionTag::Sufficient => {}
        }
        Ok(result)
    }

    /// 把动作结果并入状态，返回 Act 步骤描述
    async fn absorb(
        &self,
        ctx: &mut RunContext<'_>,
        result: &ActionResult,
        cycle: usize,
    ) -> Result<String, EngineError> {
        if result.action == Some(ActionTag::RetrieveData) {
            match &result.retrieval_error {
                Some(err) => {
                    let failures = ctx.state.record_retrieval_failure();
                    tracing::warn!(cycle, failures, "Retrieval unavailable: {}", err);
                    ctx.recovered(&RecoveryAction::DegradeEvidence, err.clone()).await?;
                }
                None => ctx.state.record_retrieval_success(),
            }
        }
        let new_records = ctx.state.append_evidence(result.records.clone());
        let new_insights = ctx.state.append_insights(result.insights.clone());

        let action = result.action.unwrap_or(ActionTag::Sufficient);
        let description = match (action, &result.retrieval_error) {
            (ActionTag::RetrieveData, Some(_)) => format!(
                "retrieve_data for '{}': retrieval unavailable (failure {} of {}); {} insights",
                result.query_used,
                ctx.state.consecutive_retrieval_failures(),
                self.config.max_retrieval_failures,
                result.insights.len()
            ),
            (ActionTag::RetrieveData, None) => format!(
                "retrieve_data for '{}': {} records ({} new), {} insights ({} new)",
                result.query_used,
                result.records.len(),
                new_records,
                result.insights.len(),
                new_insights
            ),
            (ActionTag::QueryInsights, _) => format!(
                "query_insights: {} insights ({} new)",
                result.insights.len(),
                new_insights
            ),
            (ActionTag::Sufficient, _) => "sufficient: no external call".to_string(),
        };
        Ok(description)
    }
}
