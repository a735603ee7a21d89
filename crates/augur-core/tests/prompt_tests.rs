use augur_abi::parse::parse_abi;
use augur_abi::table::FunctionTable;
use augur_core::config::PromptConfig;
use augur_core::context::{ExecutionContext, Interest};
use augur_core::prompt::{
    render, AbiSummary, PromptBuilder, PromptRequest, TemplateKind, NO_CONTEXT_SECTION,
};
use augur_core::trigger::CallSite;

fn token_summary() -> AbiSummary {
    let json = include_str!("../../augur-abi/tests/fixtures/token_abi.json");
    AbiSummary::from_table(&FunctionTable::from_abi(&parse_abi(json).unwrap()))
}

fn context() -> ExecutionContext {
    ExecutionContext::new(
        Interest::NewCoverage { new_edges: 4 },
        vec!["CALLVALUE".into(), "JUMPI".into()],
        r#"[{"arguments": ["withdraw", 5]}]"#,
        17,
    )
    .with_call_sequence(vec!["deposit".into(), "withdraw".into()])
}

#[test]
fn test_render_substitutes_known_names() {
    let out = render(
        "Generate ${num_cases} for ${contract}.",
        &[("num_cases", "5".to_string()), ("contract", "Token".to_string())],
    );
    assert_eq!(out, "Generate 5 for Token.");
}

#[test]
fn test_render_leaves_unknown_placeholders() {
    let out = render("a ${missing} b ${x}", &[("x", "1".to_string())]);
    assert_eq!(out, "a ${missing} b 1");
}

#[test]
fn test_render_unterminated_placeholder() {
    let out = render("value: ${oops", &[("oops", "1".to_string())]);
    assert_eq!(out, "value: ${oops");
}

#[test]
fn test_summary_lists_functions() {
    let summary = token_summary();
    assert_eq!(summary.functions.len(), 10);
    assert!(summary.functions.iter().any(|f| f.contains("transfer(address _to,uint256 _value)")));
    assert!(summary.functions.iter().any(|f| f.contains("0xa9059cbb")));
    // View and constant functions are not mutation targets.
    assert!(!summary.state_functions.iter().any(|f| f.contains("balanceOf")));
    assert!(!summary.state_functions.iter().any(|f| f.contains("owner")));
}

#[test]
fn test_seed_prompt_without_context() {
    let builder = PromptBuilder::new(PromptConfig::default());
    let summary = token_summary();
    let prompt = builder.build(&PromptRequest {
        site: CallSite::Seed,
        contract: "Token",
        abi: &summary,
        context: None,
        case_count: 5,
    });

    assert_eq!(prompt.kind, TemplateKind::ChainOfThought);
    assert!(prompt.text.contains(NO_CONTEXT_SECTION));
    assert!(prompt.text.contains("exactly 5 transactions"));
    assert!(prompt.text.contains("Token"));
    assert!(!prompt.text.contains("${"));
    assert!(prompt.system.is_none());
}

#[test]
fn test_seed_prompt_with_empty_abi_uses_fallback() {
    let builder = PromptBuilder::new(PromptConfig::default());
    let empty = AbiSummary::default();
    let prompt = builder.build(&PromptRequest {
        site: CallSite::Seed,
        contract: "Empty",
        abi: &empty,
        context: None,
        case_count: 3,
    });
    assert_eq!(prompt.kind, TemplateKind::Fallback);
    assert!(prompt.text.contains("(no functions available)"));
}

#[test]
fn test_mutation_prompt_requires_context_for_cot() {
    let builder = PromptBuilder::new(PromptConfig::default());
    let summary = token_summary();
    let mut request = PromptRequest {
        site: CallSite::Mutate,
        contract: "Token",
        abi: &summary,
        context: None,
        case_count: 0,
    };
    assert_eq!(builder.select(&request), TemplateKind::Fallback);

    let ctx = context();
    request.context = Some(&ctx);
    assert_eq!(builder.select(&request), TemplateKind::ChainOfThought);
}

#[test]
fn test_mutation_prompt_carries_context() {
    let builder = PromptBuilder::new(PromptConfig::default());
    let summary = token_summary();
    let ctx = context();
    let prompt = builder.build(&PromptRequest {
        site: CallSite::Mutate,
        contract: "Token",
        abi: &summary,
        context: Some(&ctx),
        case_count: 0,
    });

    assert!(prompt.text.contains("new coverage (4 new edges)"));
    assert!(prompt.text.contains("CALLVALUE JUMPI"));
    assert!(prompt.text.contains("deposit -> withdraw"));
    assert!(prompt.text.contains("Execution order id: 17"));
    assert!(prompt.text.contains("withdraw(uint256 amount)"));
    assert!(prompt.system.as_deref().unwrap_or("").contains("JUMPI"));
}

#[test]
fn test_custom_templates() {
    let config = PromptConfig {
        seed_primary: "cases=${num_cases} ctx=${context} extra=${unknown}".to_string(),
        ..Default::default()
    };
    let builder = PromptBuilder::new(config);
    let summary = token_summary();
    let prompt = builder.build(&PromptRequest {
        site: CallSite::Seed,
        contract: "Token",
        abi: &summary,
        context: None,
        case_count: 2,
    });
    assert_eq!(
        prompt.text,
        format!("cases=2 ctx={NO_CONTEXT_SECTION} extra=${{unknown}}")
    );
}
