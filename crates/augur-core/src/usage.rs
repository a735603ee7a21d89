//! Token usage ledger.
//!
//! Tracks model consumption per contract, in total and per phase, with an
//! approximate cost. The advisory budget is reported, never enforced; the
//! optional hard cap makes further calls fail fast.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::client::{TokenUsage, TransportError};
use crate::config::ModelConfig;
use crate::trigger::{CallSite, RunMode};

/// Token counts and call count for one phase (or the total).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseUsage {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
    pub calls: u64,
}

impl PhaseUsage {
    fn add(&mut self, prompt: u64, completion: u64, total: u64) {
        self.prompt += prompt;
        self.completion += completion;
        self.total += total;
        self.calls += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    WithinBudget,
    /// Advisory budget exceeded. Calls continue.
    OverAdvisory,
    /// Hard cap reached. Calls fail with `BudgetExhausted`.
    HardCapReached,
}

/// One JSONL line per model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub ts: DateTime<Utc>,
    pub contract: String,
    pub phase: String,
    pub mode: RunMode,
    pub model: String,
    pub temperature: f32,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub contract: String,
    pub total: PhaseUsage,
    pub by_phase: BTreeMap<String, PhaseUsage>,
    pub approx_cost: f64,
    pub status: BudgetStatus,
}

pub struct UsageLedger {
    contract: String,
    prompt_cost_per_1k: f64,
    completion_cost_per_1k: f64,
    advisory_budget: Option<u64>,
    hard_cap: Option<u64>,
    total: PhaseUsage,
    by_phase: BTreeMap<String, PhaseUsage>,
    advisory_reported: bool,
}

impl UsageLedger {
    pub fn new(contract: impl Into<String>, config: &ModelConfig) -> Self {
        Self {
            contract: contract.into(),
            prompt_cost_per_1k: config.prompt_cost_per_1k,
            completion_cost_per_1k: config.completion_cost_per_1k,
            advisory_budget: config.advisory_token_budget,
            hard_cap: config.hard_token_cap,
            total: PhaseUsage::default(),
            by_phase: BTreeMap::new(),
            advisory_reported: false,
        }
    }

    /// Fail fast if the hard cap has been reached. Without a cap this
    /// always succeeds.
    pub fn check_before_call(&self) -> Result<(), TransportError> {
        match self.hard_cap {
            Some(cap) if self.total.total >= cap => Err(TransportError::BudgetExhausted {
                used: self.total.total,
                cap,
            }),
            _ => Ok(()),
        }
    }

    /// Account one completed call and return its log record.
    pub fn record(
        &mut self,
        site: CallSite,
        mode: RunMode,
        model: &str,
        temperature: f32,
        usage: TokenUsage,
    ) -> UsageRecord {
        let total = if usage.total_tokens > 0 {
            usage.total_tokens
        } else {
            usage.prompt_tokens + usage.completion_tokens
        };
        self.total.add(usage.prompt_tokens, usage.completion_tokens, total);
        self.by_phase
            .entry(site.phase().to_string())
            .or_default()
            .add(usage.prompt_tokens, usage.completion_tokens, total);

        if self.status() == BudgetStatus::OverAdvisory && !self.advisory_reported {
            self.advisory_reported = true;
            warn!(
                contract = %self.contract,
                used = self.total.total,
                budget = self.advisory_budget.unwrap_or(0),
                "advisory token budget exceeded"
            );
        }

        UsageRecord {
            ts: Utc::now(),
            contract: self.contract.clone(),
            phase: site.phase().to_string(),
            mode,
            model: model.to_string(),
            temperature,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: total,
        }
    }

    pub fn status(&self) -> BudgetStatus {
        let used = self.total.total;
        if matches!(self.hard_cap, Some(cap) if used >= cap) {
            BudgetStatus::HardCapReached
        } else if matches!(self.advisory_budget, Some(budget) if used > budget) {
            BudgetStatus::OverAdvisory
        } else {
            BudgetStatus::WithinBudget
        }
    }

    pub fn approx_cost(&self) -> f64 {
        self.total.prompt as f64 / 1000.0 * self.prompt_cost_per_1k
            + self.total.completion as f64 / 1000.0 * self.completion_cost_per_1k
    }

    pub fn total(&self) -> PhaseUsage {
        self.total
    }

    pub fn phase(&self, site: CallSite) -> PhaseUsage {
        self.by_phase.get(site.phase()).copied().unwrap_or_default()
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            contract: self.contract.clone(),
            total: self.total,
            by_phase: self.by_phase.clone(),
            approx_cost: self.approx_cost(),
            status: self.status(),
        }
    }
}

// ── Summary over records ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractUsage {
    pub total: PhaseUsage,
    pub phases: BTreeMap<String, PhaseUsage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub contracts: BTreeMap<String, ContractUsage>,
    pub num_contracts: usize,
    pub mean_total_tokens_per_contract: f64,
}

pub fn summarize_usage(records: &[UsageRecord]) -> UsageSummary {
    let mut contracts: BTreeMap<String, ContractUsage> = BTreeMap::new();
    for record in records {
        let entry = contracts.entry(record.contract.clone()).or_default();
        let (p, c, t) = (
            record.prompt_tokens,
            record.completion_tokens,
            record.total_tokens,
        );
        entry.total.add(p, c, t);
        entry
            .phases
            .entry(record.phase.clone())
            .or_default()
            .add(p, c, t);
    }

    let num_contracts = contracts.len();
    let mean = if num_contracts == 0 {
        0.0
    } else {
        contracts.values().map(|c| c.total.total as f64).sum::<f64>() / num_contracts as f64
    };

    UsageSummary {
        contracts,
        num_contracts,
        mean_total_tokens_per_contract: mean,
    }
}
