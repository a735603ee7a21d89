use std::io::Write;

use augur_core::config::{ConfigError, GuidanceConfig};
use augur_core::context::InterestClass;

#[test]
fn test_defaults() {
    let config = GuidanceConfig::default();
    assert_eq!(config.model.seed_temperature, 0.8);
    assert_eq!(config.model.mutate_temperature, 0.5);
    assert_eq!(config.trigger.seed_case_count, 5);
    assert_eq!(config.trigger.mutation_probability, 0.30);
    assert_eq!(config.context.interesting.len(), 3);
    assert!(config.model.hard_token_cap.is_none());
    config.validate().unwrap();
}

#[test]
fn test_empty_object_is_default() {
    let config = GuidanceConfig::from_json("{}").unwrap();
    assert_eq!(config.model.model, GuidanceConfig::default().model.model);
    assert_eq!(config.context.max_log_entries, 256);
}

#[test]
fn test_partial_fixture() {
    let config = GuidanceConfig::from_json(include_str!("fixtures/guidance_config.json")).unwrap();
    assert_eq!(config.model.model, "deepseek-reasoner");
    assert_eq!(config.model.seed_temperature, 0.9);
    // Unset fields keep their defaults.
    assert_eq!(config.model.mutate_temperature, 0.5);
    assert_eq!(config.model.hard_token_cap, Some(500_000));
    assert_eq!(config.trigger.mutation_probability, 0.5);
    assert_eq!(config.trigger.rng_seed, 42);
    assert_eq!(config.trigger.seed_case_count, 5);
    assert_eq!(
        config.context.interesting,
        vec![InterestClass::NewCoverage, InterestClass::NewBugClass]
    );
    assert_eq!(config.context.max_log_entries, 64);
    assert!(config.prompts.seed_primary.contains("${num_cases}"));
}

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(include_bytes!("fixtures/guidance_config.json"))
        .unwrap();
    let config = GuidanceConfig::load(file.path()).unwrap();
    assert_eq!(config.trigger.rng_seed, 42);
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = GuidanceConfig::load(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn test_malformed_json() {
    let err = GuidanceConfig::from_json(r#"{"trigger": {"rng_seed": "abc"}}"#).unwrap_err();
    assert!(matches!(err, ConfigError::Json(_)));
}

fn invalid_field(json: &str) -> &'static str {
    match GuidanceConfig::from_json(json) {
        Err(ConfigError::Invalid { field, .. }) => field,
        other => panic!("expected invalid config, got {other:?}"),
    }
}

#[test]
fn test_validation_rejects_bad_values() {
    assert_eq!(
        invalid_field(r#"{"trigger": {"mutation_probability": 1.5}}"#),
        "trigger.mutation_probability"
    );
    assert_eq!(
        invalid_field(r#"{"trigger": {"mutation_probability": -0.1}}"#),
        "trigger.mutation_probability"
    );
    assert_eq!(
        invalid_field(r#"{"trigger": {"seed_case_count": 0}}"#),
        "trigger.seed_case_count"
    );
    assert_eq!(
        invalid_field(r#"{"model": {"mutate_temperature": 3.0}}"#),
        "model.mutate_temperature"
    );
    assert_eq!(
        invalid_field(r#"{"model": {"timeout_secs": 0}}"#),
        "model.timeout_secs"
    );
    assert_eq!(
        invalid_field(r#"{"model": {"advisory_token_budget": 1000, "hard_token_cap": 10}}"#),
        "model.hard_token_cap"
    );
}

#[test]
fn test_probability_bounds_inclusive() {
    GuidanceConfig::from_json(r#"{"trigger": {"mutation_probability": 0.0}}"#).unwrap();
    GuidanceConfig::from_json(r#"{"trigger": {"mutation_probability": 1.0}}"#).unwrap();
}
