use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use augur_abi::parse::parse_abi;
use augur_abi::table::FunctionTable;
use augur_core::client::{Completion, CompletionRequest, LlmClient, TokenUsage, TransportError};
use augur_core::config::{GuidanceConfig, ModelConfig, TriggerConfig};
use augur_core::context::{ExecutionContext, Interest};
use augur_core::pipeline::{GuidancePipeline, MutationGuidance, NoGuidanceReason, PipelinePhase};
use augur_core::report::read_jsonl;
use augur_core::stats::{FilterRecord, FilterStatistics};
use augur_core::trigger::{RunMode, TriggerReason};
use augur_core::usage::UsageRecord;
use tokio_util::sync::CancellationToken;

const ADDR: &str = "0x5B38Da6a701c568545dCfcB03FcB875f56beddC4";

/// Replays canned responses in order and records every request.
struct ScriptedClient {
    responses: Mutex<VecDeque<Result<String, TransportError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    delay: Option<Duration>,
}

impl ScriptedClient {
    fn new(responses: Vec<Result<String, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        })
    }

    fn slow(delay: Duration, response: &str) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::from(vec![Ok(response.to_string())])),
            requests: Mutex::new(Vec::new()),
            delay: Some(delay),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, index: usize) -> CompletionRequest {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(TransportError::Empty));
        next.map(|text| Completion {
            text,
            usage: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 50,
                total_tokens: 150,
            },
        })
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

fn token_table() -> FunctionTable {
    let json = include_str!("../../augur-abi/tests/fixtures/token_abi.json");
    FunctionTable::from_abi(&parse_abi(json).unwrap())
}

fn always_mutate() -> GuidanceConfig {
    GuidanceConfig {
        trigger: TriggerConfig {
            mutation_probability: 1.0,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn pipeline(config: GuidanceConfig, client: Arc<ScriptedClient>) -> GuidancePipeline {
    GuidancePipeline::new(
        config,
        "Token",
        token_table(),
        client,
        Arc::new(FilterStatistics::new()),
        CancellationToken::new(),
    )
}

fn interesting(order: u64) -> ExecutionContext {
    ExecutionContext::new(
        Interest::NewCoverage { new_edges: 2 },
        vec!["CALLER".into(), "SLOAD".into(), "JUMPI".into()],
        format!(r#"[{{"arguments": ["withdraw", {order}]}}]"#),
        order,
    )
}

fn seed_response() -> String {
    format!(
        r#"{{"transactions": [
            {{"arguments": ["transfer", "{ADDR}", 100]}},
            {{"arguments": ["withdraw"]}},
            {{"arguments": ["ghostFunc", 1]}}
        ]}}"#
    )
}

// ── Seeding ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_seed_returns_validated_cases() {
    let client = ScriptedClient::new(vec![Ok(seed_response())]);
    let mut pipeline = pipeline(GuidanceConfig::default(), client.clone());

    let outcome = pipeline.seed(RunMode::LlmSeed).await;
    assert!(outcome.decision.fire);
    assert_eq!(outcome.cases.len(), 1);
    assert_eq!(outcome.cases[0].name, "transfer");

    let request = client.request(0);
    assert_eq!(request.temperature, 0.8);
    assert!(request.json_mode);
    assert!(request.prompt.contains("exactly 5 transactions"));

    assert_eq!(
        pipeline.last_cycle(),
        &[
            PipelinePhase::Idle,
            PipelinePhase::AwaitingResponse,
            PipelinePhase::Validating,
            PipelinePhase::Accepted,
            PipelinePhase::Idle,
        ]
    );

    let report = pipeline.report();
    assert_eq!(report.filter.generated, 3);
    assert_eq!(report.filter.accepted, 1);
    assert_eq!(report.filter.reasons["arity_mismatch"], 1);
    assert_eq!(report.filter.reasons["abi_mismatch"], 1);
    assert_eq!(report.usage.by_phase["init"].calls, 1);
}

#[tokio::test]
async fn test_seed_all_rejected() {
    let client = ScriptedClient::new(vec![Ok(r#"[{"arguments": ["withdraw"]}]"#.to_string())]);
    let mut pipeline = pipeline(GuidanceConfig::default(), client);

    let outcome = pipeline.seed(RunMode::LlmFull).await;
    assert!(outcome.cases.is_empty());
    assert!(pipeline.last_cycle().contains(&PipelinePhase::Rejected));
    assert_eq!(pipeline.phase(), PipelinePhase::Idle);
}

#[tokio::test]
async fn test_seed_skipped_in_baseline() {
    let client = ScriptedClient::new(vec![Ok(seed_response())]);
    let mut pipeline = pipeline(GuidanceConfig::default(), client.clone());

    let outcome = pipeline.seed(RunMode::Baseline).await;
    assert!(!outcome.decision.fire);
    assert_eq!(outcome.decision.reason, TriggerReason::ModeDisabled);
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn test_seed_transport_failure_falls_back() {
    let client = ScriptedClient::new(vec![Err(TransportError::Status {
        status: 503,
        body: "overloaded".to_string(),
    })]);
    let mut pipeline = pipeline(GuidanceConfig::default(), client);

    let outcome = pipeline.seed(RunMode::LlmSeed).await;
    assert!(outcome.cases.is_empty());
    assert_eq!(
        pipeline.last_cycle(),
        &[
            PipelinePhase::Idle,
            PipelinePhase::AwaitingResponse,
            PipelinePhase::Idle
        ]
    );
    assert_eq!(pipeline.report().filter.generated, 0);
    assert_eq!(pipeline.report().usage.total.calls, 0);
}

#[tokio::test]
async fn test_unparsable_seed_response_counted() {
    let client = ScriptedClient::new(vec![Ok("I'd rather not.".to_string())]);
    let mut pipeline = pipeline(GuidanceConfig::default(), client);

    pipeline.seed(RunMode::LlmSeed).await;
    let report = pipeline.report();
    assert_eq!(report.filter.unparsable_responses, 1);
    assert_eq!(report.filter.generated, 0);
}

// ── Mutation ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_mutation_without_context() {
    let client = ScriptedClient::new(vec![]);
    let mut pipeline = pipeline(always_mutate(), client.clone());

    let guidance = pipeline.mutate(RunMode::LlmMutate, 1).await;
    assert!(matches!(
        guidance,
        MutationGuidance::NoGuidance(NoGuidanceReason::NotTriggered(TriggerReason::NoContext))
    ));
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn test_mutation_skipped_without_state_functions() {
    let abi = parse_abi(
        r#"[{"type": "function", "name": "totalSupply", "inputs": [],
             "stateMutability": "view"}]"#,
    )
    .unwrap();
    let client = ScriptedClient::new(vec![Ok(r#"{"totalSupply": [0]}"#.to_string())]);
    let mut pipeline = GuidancePipeline::new(
        always_mutate(),
        "ReadOnly",
        FunctionTable::from_abi(&abi),
        client.clone(),
        Arc::new(FilterStatistics::new()),
        CancellationToken::new(),
    );
    pipeline.capture(interesting(1));

    let guidance = pipeline.mutate(RunMode::LlmMutate, 1).await;
    assert!(matches!(
        guidance,
        MutationGuidance::NoGuidance(NoGuidanceReason::NoStrategy)
    ));
    assert_eq!(client.calls(), 0);
    assert_eq!(pipeline.report().usage.total.calls, 0);
}

#[tokio::test]
async fn test_mutation_produces_strategy() {
    let client = ScriptedClient::new(vec![Ok(r#"{"withdraw": ["amount"]}"#.to_string())]);
    let mut pipeline = pipeline(always_mutate(), client.clone());
    assert!(pipeline.capture(interesting(9)));

    let guidance = pipeline.mutate(RunMode::LlmFull, 3).await;
    let strategy = guidance.strategy().expect("strategy").clone();
    assert_eq!(strategy.generation, 3);
    assert_eq!(strategy.target_count(), 1);

    let request = client.request(0);
    assert_eq!(request.temperature, 0.5);
    assert!(request.system.is_some());
    assert!(request.prompt.contains("CALLER SLOAD JUMPI"));

    let reused = pipeline.current_strategy(3).unwrap();
    assert!(Arc::ptr_eq(&reused, &strategy));
    assert!(pipeline.current_strategy(4).is_none());
}

#[tokio::test]
async fn test_strategy_cleared_with_context() {
    let client = ScriptedClient::new(vec![Ok(r#"{"withdraw": ["amount"]}"#.to_string())]);
    let mut pipeline = pipeline(always_mutate(), client);
    pipeline.capture(interesting(1));
    pipeline.mutate(RunMode::LlmMutate, 1).await;
    assert!(pipeline.current_strategy(1).is_some());

    pipeline.clear_context();
    assert!(pipeline.current_strategy(1).is_none());
}

#[tokio::test]
async fn test_mutation_uses_latest_context() {
    let client = ScriptedClient::new(vec![Ok(r#"{"withdraw": ["amount"]}"#.to_string())]);
    let mut pipeline = pipeline(always_mutate(), client.clone());
    pipeline.capture(interesting(1));
    pipeline.capture(interesting(2));

    pipeline.mutate(RunMode::LlmMutate, 1).await;
    let prompt = client.request(0).prompt;
    assert!(prompt.contains("Execution order id: 2"));
    assert!(!prompt.contains("Execution order id: 1"));
}

#[tokio::test]
async fn test_mutation_transport_failure() {
    let client = ScriptedClient::new(vec![Err(TransportError::Empty)]);
    let mut pipeline = pipeline(always_mutate(), client);
    pipeline.capture(interesting(1));

    let guidance = pipeline.mutate(RunMode::LlmMutate, 1).await;
    assert!(matches!(
        guidance,
        MutationGuidance::NoGuidance(NoGuidanceReason::TransportFailure)
    ));
    assert_eq!(pipeline.phase(), PipelinePhase::Idle);
}

#[tokio::test]
async fn test_mutation_unusable_response() {
    let client = ScriptedClient::new(vec![Ok(r#"{"ghost": ["x"]}"#.to_string())]);
    let mut pipeline = pipeline(always_mutate(), client);
    pipeline.capture(interesting(1));

    let guidance = pipeline.mutate(RunMode::LlmMutate, 1).await;
    assert!(matches!(
        guidance,
        MutationGuidance::NoGuidance(NoGuidanceReason::NoStrategy)
    ));
    assert_eq!(
        pipeline.last_cycle(),
        &[
            PipelinePhase::Idle,
            PipelinePhase::AwaitingResponse,
            PipelinePhase::Validating,
            PipelinePhase::Rejected,
            PipelinePhase::Idle,
        ]
    );
}

#[tokio::test]
async fn test_mutation_probabilistic_miss() {
    let config = GuidanceConfig {
        trigger: TriggerConfig {
            mutation_probability: 0.0,
            ..Default::default()
        },
        ..Default::default()
    };
    let client = ScriptedClient::new(vec![]);
    let mut pipeline = pipeline(config, client.clone());
    pipeline.capture(interesting(1));

    let guidance = pipeline.mutate(RunMode::LlmFull, 1).await;
    assert!(matches!(
        guidance,
        MutationGuidance::NoGuidance(NoGuidanceReason::NotTriggered(
            TriggerReason::ProbabilisticMiss
        ))
    ));
    assert_eq!(client.calls(), 0);
}

// ── Time, cancellation, budget ───────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_slow_model_times_out() {
    let config = GuidanceConfig {
        model: ModelConfig {
            timeout_secs: 5,
            ..Default::default()
        },
        ..always_mutate()
    };
    let client = ScriptedClient::slow(Duration::from_secs(60), r#"{"withdraw": ["amount"]}"#);
    let mut pipeline = pipeline(config, client);
    pipeline.capture(interesting(1));

    let guidance = pipeline.mutate(RunMode::LlmMutate, 1).await;
    assert!(matches!(
        guidance,
        MutationGuidance::NoGuidance(NoGuidanceReason::TransportFailure)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_abandons_in_flight_call() {
    let cancel = CancellationToken::new();
    let client = ScriptedClient::slow(Duration::from_secs(10), r#"{"withdraw": ["amount"]}"#);
    let mut pipeline = GuidancePipeline::new(
        always_mutate(),
        "Token",
        token_table(),
        client,
        Arc::new(FilterStatistics::new()),
        cancel.clone(),
    );
    pipeline.capture(interesting(1));

    let canceller = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
    };
    let (guidance, _) = tokio::join!(pipeline.mutate(RunMode::LlmMutate, 1), canceller);

    assert!(matches!(
        guidance,
        MutationGuidance::NoGuidance(NoGuidanceReason::Cancelled)
    ));
    assert!(pipeline.current_strategy(1).is_none());
}

#[tokio::test]
async fn test_cancelled_run_discards_seed_cases() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let client = ScriptedClient::new(vec![Ok(seed_response())]);
    let stats = Arc::new(FilterStatistics::new());
    let mut pipeline = GuidancePipeline::new(
        GuidanceConfig::default(),
        "Token",
        token_table(),
        client,
        stats.clone(),
        cancel,
    );

    let outcome = pipeline.seed(RunMode::LlmSeed).await;
    assert!(outcome.cases.is_empty());
    assert_eq!(stats.snapshot().generated, 0);
}

#[tokio::test]
async fn test_hard_cap_fails_fast() {
    let config = GuidanceConfig {
        model: ModelConfig {
            advisory_token_budget: None,
            hard_token_cap: Some(100),
            ..Default::default()
        },
        ..Default::default()
    };
    let client = ScriptedClient::new(vec![Ok(seed_response()), Ok(seed_response())]);
    let mut pipeline = pipeline(config, client.clone());

    assert_eq!(pipeline.seed(RunMode::LlmSeed).await.cases.len(), 1);
    assert!(pipeline.seed(RunMode::LlmSeed).await.cases.is_empty());
    assert_eq!(client.calls(), 1);
}

// ── Reporting and export ─────────────────────────────────────────────

#[tokio::test]
async fn test_usage_and_filter_export() {
    let dir = tempfile::tempdir().unwrap();
    let usage_path = dir.path().join("logs/usage.jsonl");
    let filter_path = dir.path().join("logs/filter_stats.jsonl");

    let client = ScriptedClient::new(vec![
        Ok(seed_response()),
        Ok(r#"{"transfer": ["_value"]}"#.to_string()),
    ]);
    let mut pipeline = pipeline(always_mutate(), client).with_usage_log(&usage_path);

    pipeline.seed(RunMode::LlmFull).await;
    pipeline.capture(interesting(5));
    pipeline.mutate(RunMode::LlmFull, 1).await;

    let usage: Vec<UsageRecord> = read_jsonl(&usage_path).unwrap();
    assert_eq!(usage.len(), 2);
    assert_eq!(usage[0].phase, "init");
    assert_eq!(usage[1].phase, "mutation");
    assert_eq!(usage[1].model, "scripted");
    assert_eq!(usage[1].mode, RunMode::LlmFull);

    assert!(pipeline.export_filter_stats(&filter_path).unwrap());
    let records: Vec<FilterRecord> = read_jsonl(&filter_path).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].contract, "Token");
    assert_eq!(records[0].total_generated, 3);
    assert_eq!(records[0].filter_rate_percent, 66.67);
}

#[tokio::test]
async fn test_export_skipped_when_nothing_generated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("filter_stats.jsonl");
    let pipeline = pipeline(GuidanceConfig::default(), ScriptedClient::new(vec![]));

    assert!(!pipeline.export_filter_stats(&path).unwrap());
    assert!(!path.exists());
}

#[tokio::test]
async fn test_report_counts_triggers() {
    let client = ScriptedClient::new(vec![Ok(seed_response())]);
    let mut pipeline = pipeline(always_mutate(), client);

    pipeline.seed(RunMode::LlmFull).await;
    pipeline.mutate(RunMode::LlmFull, 1).await;
    pipeline.mutate(RunMode::Baseline, 2).await;

    let report = pipeline.report();
    assert_eq!(report.triggers["always_on"], 1);
    assert_eq!(report.triggers["no_context"], 1);
    assert_eq!(report.triggers["mode_disabled"], 1);
    assert_eq!(report.contexts_captured, 0);
    assert!((report.acceptance_rate - 1.0 / 3.0).abs() < 1e-9);
}
