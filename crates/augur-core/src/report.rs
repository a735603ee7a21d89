//! End-of-session reporting and JSONL export.
//!
//! Usage and filter records are appended one JSON object per line so that
//! many runs can share a file; the summaries here read them back.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::stats::{round2, FilterRecord, FilterSnapshot};
use crate::trigger::TriggerReason;
use crate::usage::UsageSnapshot;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Append one record as a JSON line, creating the file and parent
/// directories as needed.
pub fn append_jsonl<T: Serialize>(path: impl AsRef<Path>, record: &T) -> Result<(), ExportError> {
    let path = path.as_ref();
    let io_err = |source| ExportError::Io {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut line = serde_json::to_string(record)?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_err)?;
    file.write_all(line.as_bytes()).map_err(io_err)
}

/// Read every parseable record. Blank lines are skipped; malformed lines are
/// logged and skipped.
pub fn read_jsonl<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>, ExportError> {
    let path = path.as_ref();
    let io_err = |source| ExportError::Io {
        path: path.display().to_string(),
        source,
    };

    let file = std::fs::File::open(path).map_err(io_err)?;
    let mut records = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(io_err)?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(
                path = %path.display(),
                line = lineno + 1,
                error = %e,
                "skipping malformed record"
            ),
        }
    }
    Ok(records)
}

// ── Session report ───────────────────────────────────────────────────

/// What one contract session did with the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub contract: String,
    pub filter: FilterSnapshot,
    pub acceptance_rate: f64,
    pub usage: UsageSnapshot,
    /// Trigger decisions by reason label.
    pub triggers: BTreeMap<String, u64>,
    pub contexts_captured: u64,
    pub contexts_ignored: u64,
}

impl RunReport {
    pub fn new(
        contract: &str,
        filter: FilterSnapshot,
        usage: UsageSnapshot,
        triggers: &BTreeMap<TriggerReason, u64>,
        contexts_captured: u64,
        contexts_ignored: u64,
    ) -> Self {
        Self {
            contract: contract.to_string(),
            acceptance_rate: filter.acceptance_rate(),
            filter,
            usage,
            triggers: triggers
                .iter()
                .map(|(reason, count)| (reason.as_str().to_string(), *count))
                .collect(),
            contexts_captured,
            contexts_ignored,
        }
    }

    /// Filter record for this session, if anything was generated.
    pub fn filter_record(&self) -> Option<FilterRecord> {
        FilterRecord::from_snapshot(&self.contract, &self.filter)
    }
}

// ── Filter analysis ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractTotals {
    pub total_generated: u64,
    pub total_accepted: u64,
    pub total_rejected: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonShare {
    pub count: u64,
    pub percent_of_rejected: f64,
    pub percent_of_total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterAnalysis {
    pub total_contracts: usize,
    /// One record per session.
    pub total_sessions: usize,
    pub total_generated: u64,
    pub total_accepted: u64,
    pub total_rejected: u64,
    pub total_unparsable: u64,
    pub filter_rate_percent: f64,
    pub acceptance_rate_percent: f64,
    pub rejection_reasons: BTreeMap<String, u64>,
    /// Empty when nothing was rejected.
    pub reason_distribution: BTreeMap<String, ReasonShare>,
    pub per_contract: BTreeMap<String, ContractTotals>,
}

/// Aggregate filter records across sessions. `None` for no records.
pub fn summarize_filter_records(records: &[FilterRecord]) -> Option<FilterAnalysis> {
    if records.is_empty() {
        return None;
    }

    let mut reasons: BTreeMap<String, u64> = BTreeMap::new();
    let mut per_contract: BTreeMap<String, ContractTotals> = BTreeMap::new();
    let (mut generated, mut accepted, mut rejected, mut unparsable) = (0u64, 0u64, 0u64, 0u64);

    for record in records {
        generated += record.total_generated;
        accepted += record.total_accepted;
        rejected += record.total_rejected;
        unparsable += record.unparsable_responses;
        for (reason, count) in &record.rejection_reasons {
            *reasons.entry(reason.clone()).or_insert(0) += count;
        }
        let totals = per_contract.entry(record.contract.clone()).or_default();
        totals.total_generated += record.total_generated;
        totals.total_accepted += record.total_accepted;
        totals.total_rejected += record.total_rejected;
    }

    let (filter_rate, acceptance_rate) = if generated > 0 {
        (
            rejected as f64 / generated as f64 * 100.0,
            accepted as f64 / generated as f64 * 100.0,
        )
    } else {
        (0.0, 0.0)
    };

    let reason_distribution = if rejected > 0 {
        reasons
            .iter()
            .map(|(reason, &count)| {
                let share = ReasonShare {
                    count,
                    percent_of_rejected: round2(count as f64 / rejected as f64 * 100.0),
                    percent_of_total: round2(count as f64 / generated as f64 * 100.0),
                };
                (reason.clone(), share)
            })
            .collect()
    } else {
        BTreeMap::new()
    };

    Some(FilterAnalysis {
        total_contracts: per_contract.len(),
        total_sessions: records.len(),
        total_generated: generated,
        total_accepted: accepted,
        total_rejected: rejected,
        total_unparsable: unparsable,
        filter_rate_percent: round2(filter_rate),
        acceptance_rate_percent: round2(acceptance_rate),
        rejection_reasons: reasons,
        reason_distribution,
        per_contract,
    })
}
