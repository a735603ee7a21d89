//! Guidance pipeline: one instance per contract under test.
//!
//! Composes trigger policy, context slot, prompt builder, model client,
//! validator and strategy synthesizer for the two call sites. Nothing here
//! fails the host run: every failure path ends in "no guidance" and the
//! host continues with baseline behaviour.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use augur_abi::table::FunctionTable;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{Completion, CompletionRequest, LlmClient, TransportError};
use crate::config::GuidanceConfig;
use crate::context::{ContextSlot, ExecutionContext};
use crate::prompt::{AbiSummary, PromptBuilder, PromptRequest, RenderedPrompt};
use crate::report::{append_jsonl, ExportError, RunReport};
use crate::stats::{FilterRecord, FilterStatistics};
use crate::strategy::{MutationStrategy, StrategySynthesizer};
use crate::trigger::{CallSite, RunMode, TriggerDecision, TriggerPolicy, TriggerReason};
use crate::usage::UsageLedger;
use crate::validate::{ResponseValidator, ValidatedCase};

/// Where a guidance cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Idle,
    AwaitingResponse,
    Validating,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoGuidanceReason {
    /// The trigger policy declined the call.
    NotTriggered(TriggerReason),
    /// The model could not be reached in time, or the budget is spent.
    TransportFailure,
    /// The model answered but nothing usable came out of it.
    NoStrategy,
    /// The run was cancelled while the call was in flight.
    Cancelled,
}

impl fmt::Display for NoGuidanceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoGuidanceReason::NotTriggered(reason) => {
                write!(f, "not triggered ({})", reason.as_str())
            }
            NoGuidanceReason::TransportFailure => write!(f, "transport failure"),
            NoGuidanceReason::NoStrategy => write!(f, "no usable strategy"),
            NoGuidanceReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum MutationGuidance {
    Strategy(Arc<MutationStrategy>),
    NoGuidance(NoGuidanceReason),
}

impl MutationGuidance {
    pub fn strategy(&self) -> Option<&Arc<MutationStrategy>> {
        match self {
            MutationGuidance::Strategy(s) => Some(s),
            MutationGuidance::NoGuidance(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeedOutcome {
    pub decision: TriggerDecision,
    /// Empty whenever the model was not consulted or nothing survived validation.
    pub cases: Vec<ValidatedCase>,
}

pub struct GuidancePipeline {
    contract: String,
    config: GuidanceConfig,
    table: FunctionTable,
    abi_summary: AbiSummary,
    client: Arc<dyn LlmClient>,
    stats: Arc<FilterStatistics>,
    cancel: CancellationToken,
    trigger: TriggerPolicy,
    context: ContextSlot,
    prompts: PromptBuilder,
    usage: UsageLedger,
    usage_log: Option<PathBuf>,
    phase: PipelinePhase,
    /// Phases visited by the most recent cycle, starting from `Idle`.
    last_cycle: Vec<PipelinePhase>,
    last_strategy: Option<Arc<MutationStrategy>>,
}

impl GuidancePipeline {
    pub fn new(
        config: GuidanceConfig,
        contract: impl Into<String>,
        table: FunctionTable,
        client: Arc<dyn LlmClient>,
        stats: Arc<FilterStatistics>,
        cancel: CancellationToken,
    ) -> Self {
        let contract = contract.into();
        Self {
            abi_summary: AbiSummary::from_table(&table),
            trigger: TriggerPolicy::new(config.trigger.clone()),
            context: ContextSlot::new(config.context.clone()),
            prompts: PromptBuilder::new(config.prompts.clone()),
            usage: UsageLedger::new(contract.clone(), &config.model),
            contract,
            config,
            table,
            client,
            stats,
            cancel,
            usage_log: None,
            phase: PipelinePhase::Idle,
            last_cycle: Vec::new(),
            last_strategy: None,
        }
    }

    /// Append a usage record per model call to `path`.
    pub fn with_usage_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.usage_log = Some(path.into());
        self
    }

    /// Replace the trigger policy, e.g. with one seeded from the host run.
    pub fn with_trigger_policy(mut self, policy: TriggerPolicy) -> Self {
        self.trigger = policy;
        self
    }

    /// Record an interesting execution. Returns whether it became the live context.
    pub fn capture(&mut self, context: ExecutionContext) -> bool {
        self.context.capture(context)
    }

    /// Drop the live context, e.g. when the host restarts a lineage. The
    /// remembered strategy goes with it.
    pub fn clear_context(&mut self) {
        self.context.clear();
        self.last_strategy = None;
    }

    pub fn has_context(&self) -> bool {
        self.context.is_live()
    }

    pub fn phase(&self) -> PipelinePhase {
        self.phase
    }

    pub fn last_cycle(&self) -> &[PipelinePhase] {
        &self.last_cycle
    }

    pub fn contract(&self) -> &str {
        &self.contract
    }

    pub fn table(&self) -> &FunctionTable {
        &self.table
    }

    // ── Seeding ──────────────────────────────────────────────────────

    /// Ask the model for an initial population.
    pub async fn seed(&mut self, mode: RunMode) -> SeedOutcome {
        let decision = self
            .trigger
            .decide(CallSite::Seed, mode, self.context.is_live());
        if !decision.fire {
            debug!(
                contract = %self.contract,
                reason = decision.reason.as_str(),
                "seeding not triggered"
            );
            return SeedOutcome {
                decision,
                cases: Vec::new(),
            };
        }

        self.begin_cycle();
        let context = self.context.current();
        let prompt = self.prompts.build(&PromptRequest {
            site: CallSite::Seed,
            contract: &self.contract,
            abi: &self.abi_summary,
            context: context.as_deref(),
            case_count: decision.case_count,
        });

        let completion = match self.call_model(CallSite::Seed, mode, prompt).await {
            Ok(completion) => completion,
            Err(_) => {
                return SeedOutcome {
                    decision,
                    cases: Vec::new(),
                }
            }
        };

        self.transition(PipelinePhase::Validating);
        let report = ResponseValidator::new(&self.table).validate(&completion.text);
        if self.cancel.is_cancelled() {
            debug!(contract = %self.contract, "discarding seed cases produced after cancellation");
            self.transition(PipelinePhase::Idle);
            return SeedOutcome {
                decision,
                cases: Vec::new(),
            };
        }

        self.stats.absorb(&report.delta);
        let outcome = if report.accepted.is_empty() {
            PipelinePhase::Rejected
        } else {
            PipelinePhase::Accepted
        };
        self.transition(outcome);
        info!(
            contract = %self.contract,
            accepted = report.accepted.len(),
            rejected = report.delta.total_rejected(),
            unparsable = report.delta.unparsable_responses,
            "seed cases ready"
        );
        self.transition(PipelinePhase::Idle);

        SeedOutcome {
            decision,
            cases: report.accepted,
        }
    }

    // ── Mutation ─────────────────────────────────────────────────────

    /// Ask the model which parameters to mutate for `generation`.
    pub async fn mutate(&mut self, mode: RunMode, generation: u64) -> MutationGuidance {
        let has_context = self.context.is_live();
        if !has_context {
            self.last_strategy = None;
        }
        let decision = self.trigger.decide(CallSite::Mutate, mode, has_context);
        if !decision.fire {
            return MutationGuidance::NoGuidance(NoGuidanceReason::NotTriggered(decision.reason));
        }
        let Some(context) = self.context.current() else {
            return MutationGuidance::NoGuidance(NoGuidanceReason::NotTriggered(
                TriggerReason::NoContext,
            ));
        };
        if self.table.state_functions().next().is_none() {
            debug!(
                contract = %self.contract,
                "no state functions to target; skipping model call"
            );
            return MutationGuidance::NoGuidance(NoGuidanceReason::NoStrategy);
        }

        self.begin_cycle();
        let prompt = self.prompts.build(&PromptRequest {
            site: CallSite::Mutate,
            contract: &self.contract,
            abi: &self.abi_summary,
            context: Some(&context),
            case_count: 0,
        });

        let completion = match self.call_model(CallSite::Mutate, mode, prompt).await {
            Ok(completion) => completion,
            Err(TransportError::Cancelled) => {
                return MutationGuidance::NoGuidance(NoGuidanceReason::Cancelled)
            }
            Err(_) => return MutationGuidance::NoGuidance(NoGuidanceReason::TransportFailure),
        };

        self.transition(PipelinePhase::Validating);
        let strategy = StrategySynthesizer::new(&self.table).synthesize(
            &context,
            &completion.text,
            generation,
        );
        if self.cancel.is_cancelled() {
            debug!(contract = %self.contract, "discarding strategy produced after cancellation");
            self.transition(PipelinePhase::Idle);
            return MutationGuidance::NoGuidance(NoGuidanceReason::Cancelled);
        }

        match strategy {
            Some(strategy) => {
                self.transition(PipelinePhase::Accepted);
                let strategy = Arc::new(strategy);
                self.last_strategy = Some(Arc::clone(&strategy));
                info!(
                    contract = %self.contract,
                    generation,
                    targets = strategy.target_count(),
                    "mutation strategy ready"
                );
                self.transition(PipelinePhase::Idle);
                MutationGuidance::Strategy(strategy)
            }
            None => {
                self.transition(PipelinePhase::Rejected);
                self.transition(PipelinePhase::Idle);
                MutationGuidance::NoGuidance(NoGuidanceReason::NoStrategy)
            }
        }
    }

    /// The strategy produced for `generation`, if any. Strategies from other
    /// generations are never returned, and an empty context slot clears it.
    pub fn current_strategy(&mut self, generation: u64) -> Option<Arc<MutationStrategy>> {
        if !self.context.is_live() {
            self.last_strategy = None;
            return None;
        }
        self.last_strategy
            .as_ref()
            .filter(|s| s.generation == generation)
            .cloned()
    }

    // ── Model call ───────────────────────────────────────────────────

    async fn call_model(
        &mut self,
        site: CallSite,
        mode: RunMode,
        prompt: RenderedPrompt,
    ) -> Result<Completion, TransportError> {
        self.transition(PipelinePhase::AwaitingResponse);
        let result = self.request(site, mode, prompt).await;
        if let Err(error) = &result {
            warn!(
                contract = %self.contract,
                %site,
                %error,
                "model call failed; falling back to baseline"
            );
            self.transition(PipelinePhase::Idle);
        }
        result
    }

    async fn request(
        &mut self,
        site: CallSite,
        mode: RunMode,
        prompt: RenderedPrompt,
    ) -> Result<Completion, TransportError> {
        self.usage.check_before_call()?;

        let temperature = match site {
            CallSite::Seed => self.config.model.seed_temperature,
            CallSite::Mutate => self.config.model.mutate_temperature,
        };
        let request = CompletionRequest {
            system: prompt.system,
            prompt: prompt.text,
            temperature,
            max_tokens: self.config.model.max_tokens,
            json_mode: self.config.model.json_mode,
        };
        debug!(
            contract = %self.contract,
            %site,
            template = ?prompt.kind,
            temperature,
            "calling model"
        );

        let timeout = self.config.model.timeout();
        let client = Arc::clone(&self.client);
        let completion = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TransportError::Cancelled),
            result = tokio::time::timeout(timeout, client.complete(&request)) => {
                result.unwrap_or(Err(TransportError::Timeout(timeout)))
            }
        }?;
        if self.cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let record = self
            .usage
            .record(site, mode, client.model(), temperature, completion.usage);
        if let Some(path) = &self.usage_log {
            if let Err(error) = append_jsonl(path, &record) {
                warn!(path = %path.display(), %error, "failed to write usage record");
            }
        }
        Ok(completion)
    }

    // ── Cycle bookkeeping ────────────────────────────────────────────

    fn begin_cycle(&mut self) {
        self.phase = PipelinePhase::Idle;
        self.last_cycle.clear();
        self.last_cycle.push(PipelinePhase::Idle);
    }

    fn transition(&mut self, next: PipelinePhase) {
        debug!(contract = %self.contract, from = ?self.phase, to = ?next, "pipeline transition");
        self.phase = next;
        self.last_cycle.push(next);
    }

    // ── Reporting ────────────────────────────────────────────────────

    pub fn report(&self) -> RunReport {
        RunReport::new(
            &self.contract,
            self.stats.snapshot(),
            self.usage.snapshot(),
            self.trigger.tally(),
            self.context.captured_count(),
            self.context.ignored_count(),
        )
    }

    /// Append this session's filter record. Returns `false` when nothing was
    /// generated and no record was written.
    pub fn export_filter_stats(&self, path: impl AsRef<Path>) -> Result<bool, ExportError> {
        let snapshot = self.stats.snapshot();
        let Some(record) = FilterRecord::from_snapshot(&self.contract, &snapshot) else {
            return Ok(false);
        };
        append_jsonl(path, &record)?;
        info!(
            contract = %self.contract,
            rejected = record.total_rejected,
            generated = record.total_generated,
            filter_rate = record.filter_rate_percent,
            "filter stats exported"
        );
        Ok(true)
    }
}
