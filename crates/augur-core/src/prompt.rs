//! Prompt construction.
//!
//! Templates use `${name}` placeholders. Rendering never fails: a missing
//! context renders an explicit "no prior context" section and unknown
//! placeholders are left as written.

use augur_abi::table::FunctionTable;
use serde::{Deserialize, Serialize};

use crate::config::PromptConfig;
use crate::context::ExecutionContext;
use crate::trigger::CallSite;

pub const NO_CONTEXT_SECTION: &str =
    "No prior context: no interesting execution has been captured for this contract yet.";

pub const SEED_COT_TEMPLATE: &str = r#"You are generating the initial population for an evolutionary fuzzer that tests the smart contract ${contract}.

Contract functions (index:signature selector):
${abi}

Prior execution context:
${context}

Think step by step before answering:
1. Identify which functions change state and which values guard their branches (balances, owners, limits, flags).
2. Choose call sequences that reach deep state: set up preconditions first, then exercise the risky function.
3. Include boundary values (0, 1, type maximum, the zero address) where a branch likely depends on them.

Return exactly ${num_cases} transactions as a single JSON object of the form
{"transactions": [{"arguments": ["<function name>", <arg1>, <arg2>, ...], "amount": 0, "blocknumber": 1, "timestamp": 0}]}

Rules:
- The first element of "arguments" is the function name exactly as listed above.
- Supply exactly one value per declared parameter, in order.
- Write integers wider than 64 bits as decimal strings, addresses as 0x-prefixed 40-digit hex, bytes as 0x-prefixed hex.
- Output only the JSON object."#;

pub const SEED_FALLBACK_TEMPLATE: &str = r#"Generate ${num_cases} test transactions for the smart contract ${contract}.

Functions:
${abi}

Context:
${context}

Respond with only a JSON object: {"transactions": [{"arguments": ["<function name>", <args...>]}]}. Give one argument per declared parameter."#;

pub const MUTATE_COT_TEMPLATE: &str = r#"I am fuzzing the smart contract ${contract} and need to decide which parameters of its state functions to mutate next.

An execution was just flagged as ${interest}.
Execution log (most recent events): ${logs}
Functions executed in this order: ${call_sequence}
Execution order id: ${order}
Test case that produced this execution: ${test_case}

State functions and their parameters:
${state_functions}

Reason about which branches in the log are close to flipping (for example a JUMPI whose condition depends on an argument), then pick the parameters most likely to reach new behaviour.

Answer with a JSON object whose keys are function names and whose values are lists of parameters to prioritise. A list item is either a parameter name or an object {"param": "<name>", "kind": "boundary" | "random" | "from_context", "value": <value for from_context>}.

Example:
{"transfer": ["_value"], "approve": [{"param": "_spender", "kind": "boundary"}], "withdraw": []}

Only list parameters you are confident will matter. Use an empty list when no parameter of a function is promising."#;

pub const MUTATE_FALLBACK_TEMPLATE: &str = r#"Suggest which parameters of the state functions of ${contract} to mutate.

State functions:
${state_functions}

Context:
${context}

Answer with only a JSON object mapping function names to lists of parameter names."#;

pub const MUTATE_SYSTEM_PROMPT: &str = "You are a smart contract analysis expert. Propose parameter changes likely to alter the control flow seen in the execution trace (for example make a JUMPI branch go the other way). Respond in the requested JSON format.";

/// Rendered view of the contract interface for prompts.
#[derive(Debug, Clone, Default)]
pub struct AbiSummary {
    pub functions: Vec<String>,
    pub state_functions: Vec<String>,
}

impl AbiSummary {
    pub fn from_table(table: &FunctionTable) -> Self {
        let functions = table
            .iter()
            .enumerate()
            .map(|(i, f)| format!("{}:{} {}", i + 1, f.display_with_names(), f.id))
            .collect();
        let state_functions = table
            .state_functions()
            .enumerate()
            .map(|(i, f)| format!("{}:{}", i + 1, f.display_with_names()))
            .collect();
        Self {
            functions,
            state_functions,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    ChainOfThought,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct RenderedPrompt {
    pub site: CallSite,
    pub kind: TemplateKind,
    pub system: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct PromptRequest<'a> {
    pub site: CallSite,
    pub contract: &'a str,
    pub abi: &'a AbiSummary,
    pub context: Option<&'a ExecutionContext>,
    pub case_count: u32,
}

pub struct PromptBuilder {
    templates: PromptConfig,
}

impl PromptBuilder {
    pub fn new(templates: PromptConfig) -> Self {
        Self { templates }
    }

    /// Pick a template for the request. Chain-of-thought needs a non-empty
    /// ABI and, for mutation, a live context.
    pub fn select(&self, req: &PromptRequest<'_>) -> TemplateKind {
        let detailed = !req.abi.is_empty()
            && match req.site {
                CallSite::Seed => true,
                CallSite::Mutate => req.context.is_some(),
            };
        if detailed {
            TemplateKind::ChainOfThought
        } else {
            TemplateKind::Fallback
        }
    }

    pub fn build(&self, req: &PromptRequest<'_>) -> RenderedPrompt {
        let kind = self.select(req);
        let template = match (req.site, kind) {
            (CallSite::Seed, TemplateKind::ChainOfThought) => &self.templates.seed_primary,
            (CallSite::Seed, TemplateKind::Fallback) => &self.templates.seed_fallback,
            (CallSite::Mutate, TemplateKind::ChainOfThought) => &self.templates.mutate_primary,
            (CallSite::Mutate, TemplateKind::Fallback) => &self.templates.mutate_fallback,
        };

        let vars = variables(req);
        let text = render(template, &vars);
        let system = match req.site {
            CallSite::Mutate if !self.templates.mutate_system.is_empty() => {
                Some(self.templates.mutate_system.clone())
            }
            _ => None,
        };

        RenderedPrompt {
            site: req.site,
            kind,
            system,
            text,
        }
    }
}

fn variables(req: &PromptRequest<'_>) -> Vec<(&'static str, String)> {
    let abi = if req.abi.functions.is_empty() {
        "(no functions available)".to_string()
    } else {
        req.abi.functions.join("\n")
    };
    let state_functions = if req.abi.state_functions.is_empty() {
        "(no state-changing functions)".to_string()
    } else {
        req.abi.state_functions.join("\n")
    };

    let mut vars = vec![
        ("contract", req.contract.to_string()),
        ("num_cases", req.case_count.to_string()),
        ("abi", abi),
        ("state_functions", state_functions),
    ];

    match req.context {
        Some(ctx) => {
            vars.push(("context", context_section(ctx)));
            vars.push(("interest", ctx.interest.describe()));
            vars.push(("logs", or_none(ctx.log.join(" "))));
            vars.push(("test_case", or_none(ctx.test_case.clone())));
            vars.push(("order", ctx.order.to_string()));
            vars.push(("call_sequence", or_none(ctx.call_sequence.join(" -> "))));
        }
        None => {
            vars.push(("context", NO_CONTEXT_SECTION.to_string()));
            vars.push(("interest", "not available".to_string()));
            vars.push(("logs", "(none)".to_string()));
            vars.push(("test_case", "(none)".to_string()));
            vars.push(("order", "(none)".to_string()));
            vars.push(("call_sequence", "(none)".to_string()));
        }
    }
    vars
}

fn context_section(ctx: &ExecutionContext) -> String {
    let mut section = format!(
        "Triggered by {} at execution #{}.\nLog: {}\nTest case: {}",
        ctx.interest.describe(),
        ctx.order,
        or_none(ctx.log.join(" ")),
        or_none(ctx.test_case.clone()),
    );
    if !ctx.call_sequence.is_empty() {
        section.push_str(&format!("\nCall order: {}", ctx.call_sequence.join(" -> ")));
    }
    if ctx.truncated {
        section.push_str("\n(context truncated)");
    }
    section
}

fn or_none(s: String) -> String {
    if s.is_empty() {
        "(none)".to_string()
    } else {
        s
    }
}

/// Substitute `${name}` placeholders. Unknown names and unterminated
/// placeholders are copied through unchanged.
pub fn render(template: &str, vars: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        match vars.iter().find(|(key, _)| *key == name) {
            Some((_, value)) => out.push_str(value),
            None => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}
