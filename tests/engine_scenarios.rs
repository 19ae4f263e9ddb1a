//! 端到端编排场景测试：脚本化的 LLM / 安全分类 / 检索替身

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use lifelog::agent::FrameKind;
use lifelog::core::{
    rejection_message, EngineError, Orchestrator, OrchestratorBuilder, SafetyPhase, TerminalState,
    CAUTION_NOTE, OUTPUT_BLOCKED_MESSAGE,
};
use lifelog::llm::{classify_prompt, last_user_prompt, LlmClient, LlmError, Message, MockLlmClient, PromptKind};
use lifelog::react::{replay_steps, ReactEvent, DEGRADED_MESSAGE};
use lifelog::retrieval::{
    EvidenceRecord, InsightKind, InsightRecord, MemoryInsightStore, SearchError, SemanticSearch,
};
use lifelog::safety::{
    LlmSafetyProvider, SafetyGate, SafetyProvider, SafetyProviderFailure, SafetyVerdict,
};
use lifelog::{process_message, process_message_stream};

const SLEEP_QUERY: &str = "What patterns do you see in my sleep?";

/// 按 prompt 类型返回固定回复的 LLM
struct ScriptedLlm {
    plan: String,
    observe: String,
    synthesis: Option<String>,
    hang_on: Option<PromptKind>,
    calls: Mutex<Vec<PromptKind>>,
}

impl ScriptedLlm {
    fn new() -> Self {
        Self {
            plan: "REASONING: need entries\nNEXT_ACTION: retrieve_data\nCONFIDENCE: MEDIUM".to_string(),
            observe: "OBSERVATION: found entries\nSUFFICIENT: YES".to_string(),
            synthesis: Some("Your sleep is shorter on weekdays.".to_string()),
            hang_on: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn count(&self, kind: PromptKind) -> usize {
        self.calls.lock().unwrap().iter().filter(|k| **k == kind).count()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let kind = classify_prompt(last_user_prompt(messages));
        self.calls.lock().unwrap().push(kind);
        if self.hang_on == Some(kind) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        match kind {
            PromptKind::Plan => Ok(self.plan.clone()),
            PromptKind::Observe => Ok(self.observe.clone()),
            PromptKind::Synthesis => self
                .synthesis
                .clone()
                .ok_or_else(|| LlmError::Api("model overloaded".to_string())),
            other => Err(LlmError::Api(format!("unexpected prompt {other:?}"))),
        }
    }
}

/// 输入/输出各返回固定结论的安全分类器
struct ScriptedSafety {
    input: Result<SafetyVerdict, SafetyProviderFailure>,
    output: Result<SafetyVerdict, SafetyProviderFailure>,
    calls: AtomicUsize,
}

impl ScriptedSafety {
    fn safe() -> Self {
        Self {
            input: Ok(SafetyVerdict::safe("ok")),
            output: Ok(SafetyVerdict::safe("ok")),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SafetyProvider for ScriptedSafety {
    async fn classify(
        &self,
        _text: &str,
        phase: SafetyPhase,
        _context: Option<&str>,
    ) -> Result<SafetyVerdict, SafetyProviderFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match phase {
            SafetyPhase::Input => self.input.clone(),
            SafetyPhase::Output => self.output.clone(),
        }
    }
}

struct FixedSearch {
    records: Vec<EvidenceRecord>,
    calls: AtomicUsize,
}

#[async_trait]
impl SemanticSearch for FixedSearch {
    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<EvidenceRecord>, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.iter().take(limit).cloned().collect())
    }
}

struct DownSearch {
    calls: AtomicUsize,
}

#[async_trait]
impl SemanticSearch for DownSearch {
    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<EvidenceRecord>, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(SearchError::Transport("connection refused".to_string()))
    }
}

fn sleep_records() -> Arc<FixedSearch> {
    Arc::new(FixedSearch {
        records: vec![
            EvidenceRecord::new("d1", "Category: sleep. Slept 7.5 hours, woke refreshed", 0.91)
                .with_metadata("date", "2025-10-20"),
            EvidenceRecord::new("d2", "Category: sleep. Slept 5 hours after late work", 0.87)
                .with_metadata("date", "2025-10-21"),
            EvidenceRecord::new("d3", "Category: sleep. Restless night, 6 hours", 0.80)
                .with_metadata("date", "2025-10-22"),
        ],
        calls: AtomicUsize::new(0),
    })
}

fn build(
    llm: Arc<dyn LlmClient>,
    safety: Arc<dyn SafetyProvider>,
    search: Arc<dyn SemanticSearch>,
) -> Orchestrator {
    OrchestratorBuilder::new()
        .with_llm(llm)
        .with_safety_provider(safety)
        .with_search(search)
        .build()
        .unwrap()
}

fn step_names(orch_steps: &[lifelog::core::ReasoningStep]) -> Vec<String> {
    orch_steps.iter().map(|s| s.step.clone()).collect()
}

#[tokio::test]
async fn test_scenario_sleep_patterns_single_cycle() {
    let search = sleep_records();
    let store = Arc::new(MemoryInsightStore::new(vec![InsightRecord::new(
        InsightKind::Kpi,
        "sleep",
        "sleep KPIs: average_hours=6.2",
    )]));
    let orch = OrchestratorBuilder::new()
        .with_llm(Arc::new(MockLlmClient))
        .with_search(search.clone())
        .with_insight_store(store)
        .build()
        .unwrap();

    let resp = process_message(&orch, SLEEP_QUERY).await;
    assert!(resp.success);
    assert_eq!(resp.react_cycles, 1);
    assert_eq!(resp.retrieved_entries, 3);
    assert!(!resp.response.is_empty());
    assert_eq!(resp.safety_checks.len(), 2);
    assert!(resp.safety_checks.iter().all(|c| c.is_safe));
    assert_eq!(resp.safety_checks[0].phase, SafetyPhase::Input);
    assert_eq!(resp.terminal_state, Some(TerminalState::Delivered));
    assert_eq!(
        step_names(&resp.reasoning_steps),
        vec![
            "Input Safety Check",
            "Reason (Cycle 1)",
            "Act (Cycle 1)",
            "Observe (Cycle 1)",
            "Synthesize Response",
            "Output Safety Check",
        ]
    );
    assert_eq!(search.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_scenario_medical_request_blocked_at_input() {
    let safety = Arc::new(ScriptedSafety {
        input: Ok(SafetyVerdict {
            is_safe: false,
            category: Some("medical_advice".to_string()),
            should_block: true,
            needs_modification: false,
            explanation: "asks for a prescription".to_string(),
        }),
        ..ScriptedSafety::safe()
    });
    let llm = Arc::new(ScriptedLlm::new());
    let search = sleep_records();
    let orch = build(llm.clone(), safety.clone(), search.clone());

    let resp = process_message(&orch, "What medication should I take to sleep?").await;
    assert!(resp.success);
    assert!(resp.response.contains("medical_advice"));
    assert_eq!(resp.response, rejection_message("medical_advice"));
    assert_eq!(resp.react_cycles, 0);
    assert_eq!(resp.safety_checks.len(), 1);
    assert!(resp.safety_checks[0].should_block);
    assert_eq!(step_names(&resp.reasoning_steps), vec!["Input Safety Check"]);
    assert_eq!(resp.terminal_state, Some(TerminalState::Blocked));
    assert_eq!(safety.calls.load(Ordering::SeqCst), 1);
    assert_eq!(search.calls.load(Ordering::SeqCst), 0);
    assert!(llm.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_scenario_never_sufficient_forces_synthesis() {
    let llm = Arc::new(ScriptedLlm {
        observe: "OBSERVATION: still unclear\nSUFFICIENT: NO".to_string(),
        ..ScriptedLlm::new()
    });
    let orch = build(llm.clone(), Arc::new(ScriptedSafety::safe()), sleep_records());

    let outcome = orch
        .run(SLEEP_QUERY, None, &CancellationToken::new())
        .await
        .unwrap();
    let state = &outcome.state;
    assert_eq!(state.iteration_count(), 3);
    assert!(!state.should_continue());
    let observations = state.observations();
    assert_eq!(observations.len(), 3);
    assert!(observations[..2].iter().all(|o| !o.is_sufficient));
    assert!(observations[2].is_sufficient);
    assert_eq!(llm.count(PromptKind::Plan), 3);
    assert_eq!(llm.count(PromptKind::Synthesis), 1);

    let names = step_names(state.reasoning_steps());
    assert_eq!(names.len(), 13);
    let forced = names.iter().position(|n| n == "Forced Synthesis").unwrap();
    let last_observe = names.iter().rposition(|n| n.starts_with("Observe")).unwrap();
    let synth = names.iter().position(|n| n == "Synthesize Response").unwrap();
    assert_eq!(forced, last_observe + 1);
    assert_eq!(synth, forced + 1);
    assert_eq!(
        state.reasoning_steps()[forced].description,
        "forced synthesis: max cycles reached"
    );
    assert_eq!(outcome.terminal, TerminalState::Delivered);
}

#[tokio::test]
async fn test_scenario_output_needs_modification() {
    let safety = Arc::new(ScriptedSafety {
        output: Ok(SafetyVerdict {
            is_safe: false,
            category: Some("medical_advice".to_string()),
            should_block: false,
            needs_modification: true,
            explanation: "borderline health claim".to_string(),
        }),
        ..ScriptedSafety::safe()
    });
    let orch = build(Arc::new(ScriptedLlm::new()), safety, sleep_records());

    let resp = process_message(&orch, SLEEP_QUERY).await;
    assert_eq!(resp.terminal_state, Some(TerminalState::Modified));
    assert!(resp.response.starts_with("Your sleep is shorter on weekdays."));
    assert!(resp.response.contains(CAUTION_NOTE));
    assert_eq!(
        resp.safety_checks
            .iter()
            .filter(|c| c.needs_modification)
            .count(),
        1
    );
    assert_eq!(resp.safety_checks[1].phase, SafetyPhase::Output);
}

#[tokio::test]
async fn test_output_block_replaces_response() {
    let safety = Arc::new(ScriptedSafety {
        output: Ok(SafetyVerdict {
            is_safe: false,
            category: Some("financial_advice".to_string()),
            should_block: true,
            needs_modification: false,
            explanation: "stock picks".to_string(),
        }),
        ..ScriptedSafety::safe()
    });
    let orch = build(Arc::new(ScriptedLlm::new()), safety, sleep_records());
    let resp = process_message(&orch, SLEEP_QUERY).await;
    assert_eq!(resp.terminal_state, Some(TerminalState::Blocked));
    assert_eq!(resp.response, OUTPUT_BLOCKED_MESSAGE);
    assert!(!resp.response.contains("weekdays"));
}

#[tokio::test]
async fn test_retrieval_down_stops_after_two_attempts() {
    let search = Arc::new(DownSearch {
        calls: AtomicUsize::new(0),
    });
    let orch = OrchestratorBuilder::new()
        .with_llm(Arc::new(MockLlmClient))
        .with_search(search.clone())
        .build()
        .unwrap();

    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        orch.run(SLEEP_QUERY, None, &CancellationToken::new()),
    )
    .await
    .expect("run must not hang")
    .unwrap();

    assert!(search.calls.load(Ordering::SeqCst) <= 2);
    assert!(outcome.state.retrieved_data().is_empty());
    assert_eq!(outcome.state.iteration_count(), 2);
    let forced = outcome
        .state
        .reasoning_steps()
        .iter()
        .find(|s| s.step == "Forced Synthesis")
        .unwrap();
    assert_eq!(forced.description, "forced synthesis: retrieval unavailable");
    assert!(!outcome.response().is_empty());
}

#[tokio::test]
async fn test_unknown_action_defaults_to_retrieval() {
    let llm = Arc::new(ScriptedLlm {
        plan: "REASONING: browse the web\nNEXT_ACTION: web_search\nCONFIDENCE: HIGH".to_string(),
        ..ScriptedLlm::new()
    });
    let search = sleep_records();
    let orch = build(llm, Arc::new(ScriptedSafety::safe()), search.clone());
    let (tx, mut rx) = mpsc::channel(64);

    let outcome = orch
        .run(SLEEP_QUERY, Some(&tx), &CancellationToken::new())
        .await
        .unwrap();
    drop(tx);
    let mut events = Vec::new();
    while let Some(e) = rx.recv().await {
        events.push(e);
    }

    assert_eq!(search.calls.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.state.retrieved_data().len(), 3);
    assert!(events.iter().any(|e| matches!(
        e,
        ReactEvent::Recovered { action, .. } if action == "default_action"
    )));
    assert!(outcome.state.reasoning_steps()[1]
        .description
        .contains("Next action: retrieve_data"));
}

#[tokio::test]
async fn test_safety_gate_is_idempotent() {
    let gate = SafetyGate::new(
        Arc::new(LlmSafetyProvider::new(Arc::new(MockLlmClient))),
        Duration::from_secs(5),
    );
    let first = gate
        .check("Please diagnose my headaches", SafetyPhase::Input, None)
        .await
        .unwrap();
    for _ in 0..3 {
        let again = gate
            .check("Please diagnose my headaches", SafetyPhase::Input, None)
            .await
            .unwrap();
        assert_eq!(again, first);
    }
    assert!(first.should_block);
}

#[tokio::test]
async fn test_trace_replays_from_events() {
    let orch = build(
        Arc::new(ScriptedLlm {
            observe: "OBSERVATION: partial\nSUFFICIENT: NO".to_string(),
            ..ScriptedLlm::new()
        }),
        Arc::new(ScriptedSafety::safe()),
        sleep_records(),
    );
    let (tx, mut rx) = mpsc::channel(1);
    let collector = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        events
    });

    let outcome = orch
        .run(SLEEP_QUERY, Some(&tx), &CancellationToken::new())
        .await
        .unwrap();
    drop(tx);
    let events = collector.await.unwrap();

    assert_eq!(replay_steps(&events), outcome.state.reasoning_steps().to_vec());
    let nodes: Vec<&str> = events.iter().map(|e| e.node()).collect();
    assert_eq!(nodes.first(), Some(&"safety_check_input"));
    assert_eq!(nodes.last(), Some(&"safety_check_output"));
    assert_eq!(nodes.iter().filter(|n| **n == "synthesize_response").count(), 1);
}

#[tokio::test]
async fn test_cancel_stops_stream_without_final_frame() {
    let llm = Arc::new(ScriptedLlm {
        hang_on: Some(PromptKind::Plan),
        ..ScriptedLlm::new()
    });
    let orch = build(llm, Arc::new(ScriptedSafety::safe()), sleep_records());
    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();

    let consumer = async {
        let first = rx.recv().await;
        cancel.cancel();
        let mut rest = Vec::new();
        while let Some(frame) = rx.recv().await {
            rest.push(frame);
        }
        (first, rest)
    };
    let (result, (first, rest)) = tokio::join!(
        process_message_stream(&orch, SLEEP_QUERY, tx, cancel.clone()),
        consumer
    );

    assert_eq!(result, Err(EngineError::Cancelled));
    assert_eq!(first.unwrap().kind, FrameKind::Intermediate);
    assert!(rest.iter().all(|f| f.kind == FrameKind::Intermediate));
}

#[tokio::test]
async fn test_slow_consumer_gets_no_frames_after_cancel() {
    let llm = Arc::new(ScriptedLlm {
        observe: "OBSERVATION: still unclear\nSUFFICIENT: NO".to_string(),
        ..ScriptedLlm::new()
    });
    let orch = build(llm, Arc::new(ScriptedSafety::safe()), sleep_records());
    let (tx, mut rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();

    let consumer = async {
        let first = rx.recv().await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        // 取消前已进入通道的帧先取走，之后再到达的都算取消后发出的
        let mut before_cancel = 0;
        while rx.try_recv().is_ok() {
            before_cancel += 1;
        }
        cancel.cancel();
        let mut after_cancel = 0;
        while rx.recv().await.is_some() {
            after_cancel += 1;
        }
        (first, before_cancel, after_cancel)
    };
    let (result, (first, before_cancel, after_cancel)) = tokio::join!(
        process_message_stream(&orch, SLEEP_QUERY, tx, cancel.clone()),
        consumer
    );

    assert_eq!(result, Err(EngineError::Cancelled));
    assert!(first.is_some());
    assert!(before_cancel <= 1);
    assert_eq!(after_cancel, 0);
}

#[tokio::test]
async fn test_stalled_consumer_does_not_block_cancel() {
    let orch = build(
        Arc::new(ScriptedLlm::new()),
        Arc::new(ScriptedSafety::safe()),
        sleep_records(),
    );
    // 接收端保持打开但从不读取
    let (tx, _rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(3),
        process_message_stream(&orch, SLEEP_QUERY, tx, cancel),
    )
    .await
    .expect("stream must return once cancelled");
    assert_eq!(result, Err(EngineError::Cancelled));
}

#[tokio::test]
async fn test_dropped_consumer_cancels_run() {
    let orch = build(
        Arc::new(ScriptedLlm::new()),
        Arc::new(ScriptedSafety::safe()),
        sleep_records(),
    );
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let cancel = CancellationToken::new();
    let result = process_message_stream(&orch, SLEEP_QUERY, tx, cancel.clone()).await;
    assert_eq!(result, Err(EngineError::Cancelled));
    assert!(cancel.is_cancelled());
}

#[tokio::test]
async fn test_synthesis_failure_delivers_degraded_message() {
    let llm = Arc::new(ScriptedLlm {
        synthesis: None,
        ..ScriptedLlm::new()
    });
    let orch = build(llm, Arc::new(ScriptedSafety::safe()), sleep_records());
    let outcome = orch
        .run(SLEEP_QUERY, None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.response(), DEGRADED_MESSAGE);
    assert!(outcome.degraded.is_some());
    assert_eq!(outcome.state.safety_checks().len(), 2);
}

#[tokio::test]
async fn test_classifier_failure_fails_closed() {
    let safety = Arc::new(ScriptedSafety {
        input: Err(SafetyProviderFailure::Fatal("503".to_string())),
        ..ScriptedSafety::safe()
    });
    let orch = build(Arc::new(ScriptedLlm::new()), safety, sleep_records());
    let resp = process_message(&orch, SLEEP_QUERY).await;
    assert_eq!(resp.terminal_state, Some(TerminalState::Blocked));
    assert_eq!(resp.safety_checks[0].category.as_deref(), Some("unknown_error"));
    assert!(resp.response.contains("unknown_error"));
}

#[tokio::test]
async fn test_input_classifier_failure_admitted_when_fail_open() {
    let safety = Arc::new(ScriptedSafety {
        input: Err(SafetyProviderFailure::Fatal("503".to_string())),
        ..ScriptedSafety::safe()
    });
    let orch = OrchestratorBuilder::new()
        .with_llm(Arc::new(ScriptedLlm::new()))
        .with_safety_provider(safety)
        .with_search(sleep_records())
        .with_safety_fail_closed(false)
        .build()
        .unwrap();
    let resp = process_message(&orch, SLEEP_QUERY).await;
    assert_eq!(resp.react_cycles, 1);
    let input = &resp.safety_checks[0];
    assert!(input.is_safe);
    assert!(!input.should_block);
    assert!(!input.needs_modification);
    assert_eq!(input.category.as_deref(), Some("unknown_error"));
    assert_eq!(resp.terminal_state, Some(TerminalState::Delivered));
}

#[tokio::test]
async fn test_output_classifier_failure_flagged_when_fail_open() {
    let safety = Arc::new(ScriptedSafety {
        output: Err(SafetyProviderFailure::Fatal("503".to_string())),
        ..ScriptedSafety::safe()
    });
    let orch = OrchestratorBuilder::new()
        .with_llm(Arc::new(ScriptedLlm::new()))
        .with_safety_provider(safety)
        .with_search(sleep_records())
        .with_safety_fail_closed(false)
        .build()
        .unwrap();
    let resp = process_message(&orch, SLEEP_QUERY).await;
    let output = &resp.safety_checks[1];
    assert!(!output.is_safe);
    assert!(!output.should_block);
    assert_eq!(resp.terminal_state, Some(TerminalState::Modified));
    assert!(resp.response.contains(CAUTION_NOTE));
}

#[tokio::test]
async fn test_concurrent_requests_are_independent() {
    let orch = OrchestratorBuilder::new()
        .with_llm(Arc::new(MockLlmClient))
        .with_search(sleep_records())
        .build()
        .unwrap();
    let queries = [SLEEP_QUERY, "How much did I sleep?", "Can you prescribe something for sleep?"];
    let responses =
        futures_util::future::join_all(queries.iter().map(|q| process_message(&orch, q))).await;

    assert_eq!(responses[0].react_cycles, 1);
    assert_eq!(responses[1].react_cycles, 1);
    assert_eq!(responses[2].react_cycles, 0);
    assert_eq!(responses[2].terminal_state, Some(TerminalState::Blocked));
    assert!(responses.iter().all(|r| r.safety_checks[0].phase == SafetyPhase::Input));
}
