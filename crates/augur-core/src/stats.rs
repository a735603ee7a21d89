//! Filter statistics for model-generated cases.
//!
//! One [`FilterStatistics`] accumulator per contract session, shared by
//! reference and updated with atomic increments. The validator produces a
//! [`FilterDelta`] per response; the pipeline folds it in with `absorb`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a candidate case was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InvalidFormat,
    AbiMismatch,
    TypeSanitizeFail,
    ArityMismatch,
}

impl RejectReason {
    pub const ALL: [RejectReason; 4] = [
        RejectReason::InvalidFormat,
        RejectReason::AbiMismatch,
        RejectReason::TypeSanitizeFail,
        RejectReason::ArityMismatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::InvalidFormat => "invalid_format",
            RejectReason::AbiMismatch => "abi_mismatch",
            RejectReason::TypeSanitizeFail => "type_sanitize_fail",
            RejectReason::ArityMismatch => "arity_mismatch",
        }
    }

    fn index(&self) -> usize {
        match self {
            RejectReason::InvalidFormat => 0,
            RejectReason::AbiMismatch => 1,
            RejectReason::TypeSanitizeFail => 2,
            RejectReason::ArityMismatch => 3,
        }
    }
}

/// Counts from validating a single response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDelta {
    pub generated: u64,
    pub accepted: u64,
    pub rejected: BTreeMap<RejectReason, u64>,
    /// Responses with no parseable case list at all.
    pub unparsable_responses: u64,
}

impl FilterDelta {
    pub fn accept(&mut self) {
        self.generated += 1;
        self.accepted += 1;
    }

    pub fn reject(&mut self, reason: RejectReason) {
        self.generated += 1;
        *self.rejected.entry(reason).or_insert(0) += 1;
    }

    pub fn unparsable(&mut self) {
        self.unparsable_responses += 1;
    }

    pub fn count(&self, reason: RejectReason) -> u64 {
        self.rejected.get(&reason).copied().unwrap_or(0)
    }

    pub fn total_rejected(&self) -> u64 {
        self.rejected.values().sum()
    }
}

/// Run-scoped accumulator. Counters only grow.
#[derive(Debug, Default)]
pub struct FilterStatistics {
    generated: AtomicU64,
    accepted: AtomicU64,
    rejected: [AtomicU64; 4],
    unparsable: AtomicU64,
}

impl FilterStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb(&self, delta: &FilterDelta) {
        self.generated.fetch_add(delta.generated, Ordering::Relaxed);
        self.accepted.fetch_add(delta.accepted, Ordering::Relaxed);
        for (reason, count) in &delta.rejected {
            self.rejected[reason.index()].fetch_add(*count, Ordering::Relaxed);
        }
        self.unparsable
            .fetch_add(delta.unparsable_responses, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FilterSnapshot {
        let reasons: BTreeMap<String, u64> = RejectReason::ALL
            .iter()
            .map(|r| {
                (
                    r.as_str().to_string(),
                    self.rejected[r.index()].load(Ordering::Relaxed),
                )
            })
            .collect();
        FilterSnapshot {
            generated: self.generated.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: reasons.values().sum(),
            unparsable_responses: self.unparsable.load(Ordering::Relaxed),
            reasons,
        }
    }
}

/// Point-in-time copy of a [`FilterStatistics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSnapshot {
    pub generated: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub unparsable_responses: u64,
    /// Rejections by reason. Every reason is present, zero or not.
    pub reasons: BTreeMap<String, u64>,
}

impl FilterSnapshot {
    /// Accepted over generated, in [0, 1]. Zero when nothing was generated.
    pub fn acceptance_rate(&self) -> f64 {
        if self.generated == 0 {
            0.0
        } else {
            self.accepted as f64 / self.generated as f64
        }
    }

    /// Rejected over generated, as a percentage rounded to two places.
    pub fn filter_rate_percent(&self) -> f64 {
        if self.generated == 0 {
            0.0
        } else {
            round2(self.rejected as f64 / self.generated as f64 * 100.0)
        }
    }
}

pub(crate) fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Hands out one accumulator per contract.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    contracts: Mutex<BTreeMap<String, Arc<FilterStatistics>>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulator for `contract`, created on first use.
    pub fn for_contract(&self, contract: &str) -> Arc<FilterStatistics> {
        let mut contracts = self.contracts.lock().unwrap_or_else(|e| e.into_inner());
        contracts
            .entry(contract.to_string())
            .or_insert_with(|| Arc::new(FilterStatistics::new()))
            .clone()
    }

    pub fn snapshots(&self) -> BTreeMap<String, FilterSnapshot> {
        let contracts = self.contracts.lock().unwrap_or_else(|e| e.into_inner());
        contracts
            .iter()
            .map(|(name, stats)| (name.clone(), stats.snapshot()))
            .collect()
    }
}

/// One JSONL line written at the end of a contract session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRecord {
    pub ts: DateTime<Utc>,
    pub contract: String,
    pub total_generated: u64,
    pub total_accepted: u64,
    pub total_rejected: u64,
    pub filter_rate_percent: f64,
    pub rejection_reasons: BTreeMap<String, u64>,
    #[serde(default)]
    pub unparsable_responses: u64,
}

impl FilterRecord {
    /// `None` when the session generated nothing.
    pub fn from_snapshot(contract: &str, snapshot: &FilterSnapshot) -> Option<Self> {
        if snapshot.generated == 0 {
            return None;
        }
        Some(Self {
            ts: Utc::now(),
            contract: contract.to_string(),
            total_generated: snapshot.generated,
            total_accepted: snapshot.accepted,
            total_rejected: snapshot.rejected,
            filter_rate_percent: snapshot.filter_rate_percent(),
            rejection_reasons: snapshot.reasons.clone(),
            unparsable_responses: snapshot.unparsable_responses,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_conservation() {
        let mut delta = FilterDelta::default();
        delta.accept();
        delta.reject(RejectReason::AbiMismatch);
        delta.reject(RejectReason::AbiMismatch);
        delta.reject(RejectReason::ArityMismatch);
        delta.unparsable();

        assert_eq!(delta.generated, 4);
        assert_eq!(delta.accepted + delta.total_rejected(), delta.generated);
        assert_eq!(delta.count(RejectReason::AbiMismatch), 2);
        assert_eq!(delta.count(RejectReason::InvalidFormat), 0);
    }

    #[test]
    fn test_absorb_accumulates() {
        let stats = FilterStatistics::new();
        let mut delta = FilterDelta::default();
        delta.accept();
        delta.reject(RejectReason::TypeSanitizeFail);
        stats.absorb(&delta);
        stats.absorb(&delta);

        let snap = stats.snapshot();
        assert_eq!(snap.generated, 4);
        assert_eq!(snap.accepted, 2);
        assert_eq!(snap.rejected, 2);
        assert_eq!(snap.reasons["type_sanitize_fail"], 2);
        assert_eq!(snap.reasons["invalid_format"], 0);
        assert_eq!(snap.reasons.len(), 4);
        assert!((snap.acceptance_rate() - 0.5).abs() < 1e-9);
        assert_eq!(snap.filter_rate_percent(), 50.0);
    }

    #[test]
    fn test_empty_snapshot_rates() {
        let snap = FilterStatistics::new().snapshot();
        assert_eq!(snap.acceptance_rate(), 0.0);
        assert_eq!(snap.filter_rate_percent(), 0.0);
    }

    #[test]
    fn test_registry_per_contract() {
        let registry = StatsRegistry::new();
        let a = registry.for_contract("Token");
        let again = registry.for_contract("Token");
        let b = registry.for_contract("Vault");
        assert!(Arc::ptr_eq(&a, &again));
        assert!(!Arc::ptr_eq(&a, &b));

        let mut delta = FilterDelta::default();
        delta.accept();
        a.absorb(&delta);
        let snaps = registry.snapshots();
        assert_eq!(snaps["Token"].accepted, 1);
        assert_eq!(snaps["Vault"].accepted, 0);
    }

    #[test]
    fn test_record_skipped_when_nothing_generated() {
        let snap = FilterStatistics::new().snapshot();
        assert!(FilterRecord::from_snapshot("Token", &snap).is_none());
    }

    #[test]
    fn test_record_fields() {
        let stats = FilterStatistics::new();
        let mut delta = FilterDelta::default();
        delta.accept();
        delta.accept();
        delta.reject(RejectReason::InvalidFormat);
        stats.absorb(&delta);

        let record = FilterRecord::from_snapshot("Token", &stats.snapshot()).unwrap();
        assert_eq!(record.total_generated, 3);
        assert_eq!(record.total_rejected, 1);
        assert_eq!(record.filter_rate_percent, 33.33);

        let line = serde_json::to_value(&record).unwrap();
        assert_eq!(line["rejection_reasons"]["invalid_format"], 1);
        assert!(line["ts"].is_string());
    }
}
