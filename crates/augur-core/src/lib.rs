//! Model guidance for an evolutionary smart-contract fuzzer.
//!
//! [`pipeline::GuidancePipeline`] is the entry point: the host feeds it
//! interesting executions and asks it for seed cases or mutation guidance.

pub mod client;
pub mod config;
pub mod context;
pub mod pipeline;
pub mod prompt;
pub mod report;
pub mod stats;
pub mod strategy;
pub mod trigger;
pub mod usage;
pub mod validate;

pub use config::GuidanceConfig;
pub use pipeline::{GuidancePipeline, MutationGuidance, NoGuidanceReason, SeedOutcome};
