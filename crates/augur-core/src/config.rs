//! Guidance configuration: model settings, trigger policy, context bounds,
//! prompt templates. Loaded once at process start.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::InterestClass;
use crate::prompt;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuidanceConfig {
    pub model: ModelConfig,
    pub trigger: TriggerConfig,
    pub context: ContextConfig,
    pub prompts: PromptConfig,
}

impl GuidanceConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: GuidanceConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = self.trigger.mutation_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(ConfigError::Invalid {
                field: "trigger.mutation_probability",
                reason: format!("{p} is outside [0, 1]"),
            });
        }
        if self.trigger.seed_case_count == 0 {
            return Err(ConfigError::Invalid {
                field: "trigger.seed_case_count",
                reason: "must request at least one case".to_string(),
            });
        }
        for (field, t) in [
            ("model.seed_temperature", self.model.seed_temperature),
            ("model.mutate_temperature", self.model.mutate_temperature),
        ] {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{t} is outside [0, 2]"),
                });
            }
        }
        if self.model.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "model.timeout_secs",
                reason: "must be positive".to_string(),
            });
        }
        if let (Some(advisory), Some(cap)) = (
            self.model.advisory_token_budget,
            self.model.hard_token_cap,
        ) {
            if cap < advisory {
                return Err(ConfigError::Invalid {
                    field: "model.hard_token_cap",
                    reason: format!("cap {cap} is below advisory budget {advisory}"),
                });
            }
        }
        Ok(())
    }
}

/// Settings for the model endpoint and per-call-site sampling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// OpenAI-compatible chat completions URL.
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the bearer key. The key never lives in the file.
    pub api_key_env: String,
    /// Seeding explores broadly across the ABI surface.
    pub seed_temperature: f32,
    /// Mutation guidance stays close to a known-good path.
    pub mutate_temperature: f32,
    pub max_tokens: u32,
    /// Upper bound on one model round trip.
    pub timeout_secs: u64,
    /// Ask the endpoint for a JSON object response.
    pub json_mode: bool,
    /// Approximate price per 1000 prompt tokens (advisory accounting only).
    pub prompt_cost_per_1k: f64,
    pub completion_cost_per_1k: f64,
    /// Advisory token budget per contract. Exceeding it is reported, not enforced.
    pub advisory_token_budget: Option<u64>,
    /// Hard cap per contract. Calls beyond it fail fast.
    pub hard_token_cap: Option<u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.deepseek.com/v1/chat/completions".to_string(),
            model: "deepseek-chat".to_string(),
            api_key_env: "API_KEY".to_string(),
            seed_temperature: 0.8,
            mutate_temperature: 0.5,
            max_tokens: 4096,
            timeout_secs: 30,
            json_mode: true,
            prompt_cost_per_1k: 0.00027,
            completion_cost_per_1k: 0.0011,
            advisory_token_budget: Some(200_000),
            hard_token_cap: None,
        }
    }
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Cases requested per contract on the seeding call.
    pub seed_case_count: u32,
    /// Probability that an eligible mutation step consults the model.
    pub mutation_probability: f64,
    /// Seed for the trigger RNG.
    pub rng_seed: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            seed_case_count: 5,
            mutation_probability: 0.30,
            rng_seed: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Event classes that replace the live context.
    pub interesting: Vec<InterestClass>,
    /// A fitness event counts only when its gain exceeds this.
    pub fitness_threshold: f64,
    /// Most recent log entries kept per context.
    pub max_log_entries: usize,
    pub max_test_case_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            interesting: vec![
                InterestClass::NewCoverage,
                InterestClass::NewBugClass,
                InterestClass::FitnessImprovement,
            ],
            fitness_threshold: 0.0,
            max_log_entries: 256,
            max_test_case_chars: 8192,
        }
    }
}

/// Prompt templates per call site, primary and fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub seed_primary: String,
    pub seed_fallback: String,
    pub mutate_primary: String,
    pub mutate_fallback: String,
    pub mutate_system: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            seed_primary: prompt::SEED_COT_TEMPLATE.to_string(),
            seed_fallback: prompt::SEED_FALLBACK_TEMPLATE.to_string(),
            mutate_primary: prompt::MUTATE_COT_TEMPLATE.to_string(),
            mutate_fallback: prompt::MUTATE_FALLBACK_TEMPLATE.to_string(),
            mutate_system: prompt::MUTATE_SYSTEM_PROMPT.to_string(),
        }
    }
}
