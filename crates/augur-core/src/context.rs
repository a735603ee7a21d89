//! Context capture for amplify-and-deepen.
//!
//! Holds at most one live [`ExecutionContext`]: the most recent execution
//! the host's analyzer classified as interesting. A new capture replaces the
//! previous one; no history is kept.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ContextConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestClass {
    NewCoverage,
    NewBugClass,
    FitnessImprovement,
}

/// Why the host considered an execution interesting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum Interest {
    NewCoverage { new_edges: usize },
    NewBugClass { bug: String },
    FitnessImprovement { delta: f64 },
}

impl Interest {
    pub fn class(&self) -> InterestClass {
        match self {
            Interest::NewCoverage { .. } => InterestClass::NewCoverage,
            Interest::NewBugClass { .. } => InterestClass::NewBugClass,
            Interest::FitnessImprovement { .. } => InterestClass::FitnessImprovement,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Interest::NewCoverage { new_edges } => {
                format!("new coverage ({new_edges} new edges)")
            }
            Interest::NewBugClass { bug } => format!("new bug class ({bug})"),
            Interest::FitnessImprovement { delta } => {
                format!("fitness improvement (+{delta:.3})")
            }
        }
    }
}

/// Snapshot of one interesting execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub interest: Interest,
    /// Ordered opcodes or events from the execution trace.
    pub log: Vec<String>,
    /// Serialized test case that produced the execution.
    pub test_case: String,
    /// Host execution-order counter.
    pub order: u64,
    /// Function names in the order they were called, when the host knows them.
    #[serde(default)]
    pub call_sequence: Vec<String>,
    /// Set when the log or test case was cut to fit the configured bounds.
    #[serde(default)]
    pub truncated: bool,
}

impl ExecutionContext {
    pub fn new(
        interest: Interest,
        log: Vec<String>,
        test_case: impl Into<String>,
        order: u64,
    ) -> Self {
        Self {
            interest,
            log,
            test_case: test_case.into(),
            order,
            call_sequence: Vec::new(),
            truncated: false,
        }
    }

    pub fn with_call_sequence(mut self, calls: Vec<String>) -> Self {
        self.call_sequence = calls;
        self
    }

    /// Keep the tail of the log and the head of the test case.
    fn bound(&mut self, max_log_entries: usize, max_test_case_chars: usize) {
        if self.log.len() > max_log_entries {
            let excess = self.log.len() - max_log_entries;
            self.log.drain(..excess);
            self.truncated = true;
        }
        if let Some((cut, _)) = self.test_case.char_indices().nth(max_test_case_chars) {
            self.test_case.truncate(cut);
            self.truncated = true;
        }
    }
}

/// The single live context slot. One writer (capture), one reader (prompt building).
#[derive(Debug)]
pub struct ContextSlot {
    config: ContextConfig,
    live: Option<Arc<ExecutionContext>>,
    captured: u64,
    ignored: u64,
}

impl ContextSlot {
    pub fn new(config: ContextConfig) -> Self {
        Self {
            config,
            live: None,
            captured: 0,
            ignored: 0,
        }
    }

    /// Replace the live context if the event qualifies. Returns whether it was kept.
    pub fn capture(&mut self, mut context: ExecutionContext) -> bool {
        let class = context.interest.class();
        if !self.config.interesting.contains(&class) {
            self.ignored += 1;
            debug!(
                ?class,
                order = context.order,
                "ignoring event class not configured as interesting"
            );
            return false;
        }
        if let Interest::FitnessImprovement { delta } = context.interest {
            if delta <= self.config.fitness_threshold {
                self.ignored += 1;
                debug!(
                    delta,
                    threshold = self.config.fitness_threshold,
                    "fitness gain does not exceed threshold"
                );
                return false;
            }
        }

        context.bound(self.config.max_log_entries, self.config.max_test_case_chars);
        debug!(
            order = context.order,
            interest = %context.interest.describe(),
            log_entries = context.log.len(),
            replaced = self.live.is_some(),
            "captured execution context"
        );
        self.live = Some(Arc::new(context));
        self.captured += 1;
        true
    }

    /// Shared handle to the live context, held for one guidance cycle.
    pub fn current(&self) -> Option<Arc<ExecutionContext>> {
        self.live.clone()
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    pub fn clear(&mut self) {
        self.live = None;
    }

    pub fn captured_count(&self) -> u64 {
        self.captured
    }

    pub fn ignored_count(&self) -> u64 {
        self.ignored
    }
}
