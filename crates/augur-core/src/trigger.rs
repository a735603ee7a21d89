//! Trigger policy: decides per call site whether to consult the model.
//!
//! Seeding fires whenever the run mode asks for it. Mutation fires only with
//! a live context and a winning draw from the policy's own ChaCha8 stream, so
//! a fixed seed reproduces the same decision sequence.

use std::collections::BTreeMap;
use std::fmt;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::config::TriggerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallSite {
    Seed,
    Mutate,
}

impl CallSite {
    /// Phase label used in usage records.
    pub fn phase(&self) -> &'static str {
        match self {
            CallSite::Seed => "init",
            CallSite::Mutate => "mutation",
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallSite::Seed => write!(f, "seed"),
            CallSite::Mutate => write!(f, "mutate"),
        }
    }
}

/// Which guidance the host run asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// No model involvement.
    Baseline,
    /// Model-generated initial population only.
    LlmSeed,
    /// Model-guided mutation only.
    LlmMutate,
    /// Both call sites.
    LlmFull,
}

impl RunMode {
    pub fn requests(&self, site: CallSite) -> bool {
        matches!(
            (self, site),
            (RunMode::LlmSeed, CallSite::Seed)
                | (RunMode::LlmMutate, CallSite::Mutate)
                | (RunMode::LlmFull, _)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    AlwaysOn,
    ProbabilisticHit,
    ProbabilisticMiss,
    NoContext,
    ModeDisabled,
}

impl TriggerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::AlwaysOn => "always_on",
            TriggerReason::ProbabilisticHit => "probabilistic_hit",
            TriggerReason::ProbabilisticMiss => "probabilistic_miss",
            TriggerReason::NoContext => "no_context",
            TriggerReason::ModeDisabled => "mode_disabled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TriggerDecision {
    pub site: CallSite,
    pub fire: bool,
    pub reason: TriggerReason,
    /// Cases to request when a seeding call fires.
    pub case_count: u32,
}

pub struct TriggerPolicy {
    config: TriggerConfig,
    rng: ChaCha8Rng,
    tally: BTreeMap<TriggerReason, u64>,
}

impl TriggerPolicy {
    pub fn new(config: TriggerConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.rng_seed);
        Self::with_rng(config, rng)
    }

    /// Use a caller-supplied stream, e.g. one derived from the host's run seed.
    pub fn with_rng(config: TriggerConfig, rng: ChaCha8Rng) -> Self {
        Self {
            config,
            rng,
            tally: BTreeMap::new(),
        }
    }

    /// Decide whether `site` should consult the model.
    ///
    /// A random draw is consumed only for a mutation step that is enabled
    /// and has a live context.
    pub fn decide(&mut self, site: CallSite, mode: RunMode, has_context: bool) -> TriggerDecision {
        let (fire, reason) = if !mode.requests(site) {
            (false, TriggerReason::ModeDisabled)
        } else {
            match site {
                CallSite::Seed => (true, TriggerReason::AlwaysOn),
                CallSite::Mutate if !has_context => (false, TriggerReason::NoContext),
                CallSite::Mutate => {
                    let draw: f64 = self.rng.gen();
                    if draw < self.config.mutation_probability {
                        (true, TriggerReason::ProbabilisticHit)
                    } else {
                        (false, TriggerReason::ProbabilisticMiss)
                    }
                }
            }
        };

        *self.tally.entry(reason).or_insert(0) += 1;
        TriggerDecision {
            site,
            fire,
            reason,
            case_count: if site == CallSite::Seed {
                self.config.seed_case_count
            } else {
                0
            },
        }
    }

    /// Decisions taken so far, by reason.
    pub fn tally(&self) -> &BTreeMap<TriggerReason, u64> {
        &self.tally
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }
}
