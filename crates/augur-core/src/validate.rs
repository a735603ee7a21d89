//! Response validation: raw model text to executable cases.
//!
//! Each candidate is checked independently in a fixed order (structure,
//! function resolution, type coercion, arity) and the first failing check
//! decides its rejection reason. Validation is a pure function of the
//! response text and the function table.

use alloy_primitives::U256;
use augur_abi::coerce::{coerce, coerce_uint, AbiValue, CoerceError};
use augur_abi::table::{FunctionId, FunctionSig, FunctionTable};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::stats::{FilterDelta, RejectReason};

#[derive(Debug, thiserror::Error)]
pub enum CandidateError {
    #[error("Malformed case: {0}")]
    MalformedResponse(String),

    #[error("No function matches identifier {0}")]
    AbiMismatch(String),

    #[error("Cannot coerce {slot}: {source}")]
    TypeSanitize { slot: String, source: CoerceError },

    #[error("Function {function} takes {expected} arguments, {found} supplied")]
    ArityMismatch {
        function: String,
        expected: usize,
        found: usize,
    },
}

impl CandidateError {
    pub fn reason(&self) -> RejectReason {
        match self {
            CandidateError::MalformedResponse(_) => RejectReason::InvalidFormat,
            CandidateError::AbiMismatch(_) => RejectReason::AbiMismatch,
            CandidateError::TypeSanitize { .. } => RejectReason::TypeSanitizeFail,
            CandidateError::ArityMismatch { .. } => RejectReason::ArityMismatch,
        }
    }
}

/// One case as the model wrote it, before any checks beyond shape.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateCase {
    pub identifier: Value,
    pub arguments: Vec<Value>,
    pub amount: Option<Value>,
    pub block_number: Option<Value>,
    pub timestamp: Option<Value>,
}

impl CandidateCase {
    /// Shape check: an object whose `arguments` is a non-empty list.
    pub fn from_value(value: &Value) -> Result<Self, CandidateError> {
        let obj = value
            .as_object()
            .ok_or_else(|| CandidateError::MalformedResponse("case is not an object".to_string()))?;
        let arguments = match obj.get("arguments") {
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(CandidateError::MalformedResponse(
                    "'arguments' is not a list".to_string(),
                ))
            }
            None => {
                return Err(CandidateError::MalformedResponse(
                    "'arguments' is missing".to_string(),
                ))
            }
        };
        let (identifier, rest) = arguments
            .split_first()
            .ok_or_else(|| CandidateError::MalformedResponse("'arguments' is empty".to_string()))?;

        let field = |key: &str| obj.get(key).filter(|v| !v.is_null()).cloned();
        Ok(Self {
            identifier: identifier.clone(),
            arguments: rest.to_vec(),
            amount: field("amount"),
            block_number: field("blocknumber"),
            timestamp: field("timestamp"),
        })
    }
}

/// A case ready for the host to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedCase {
    pub function: FunctionId,
    pub name: String,
    pub arguments: Vec<AbiValue>,
    /// Wei sent with the call.
    pub amount: U256,
    pub block_number: u64,
    pub timestamp: u64,
}

impl ValidatedCase {
    /// Host transaction format: the function id leads the argument list.
    pub fn to_json(&self) -> Value {
        let mut arguments = Vec::with_capacity(self.arguments.len() + 1);
        arguments.push(Value::String(self.function.to_string()));
        arguments.extend(self.arguments.iter().map(AbiValue::to_json));
        json!({
            "arguments": arguments,
            "amount": AbiValue::Uint(self.amount, 256).to_json(),
            "blocknumber": self.block_number,
            "timestamp": self.timestamp,
            "call_return": {},
            "extcodesize": {},
            "returndatasize": {},
        })
    }
}

#[derive(Debug)]
pub struct Rejection {
    /// Position of the candidate in the response.
    pub index: usize,
    pub error: CandidateError,
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub accepted: Vec<ValidatedCase>,
    pub rejected: Vec<Rejection>,
    pub delta: FilterDelta,
}

pub struct ResponseValidator<'a> {
    table: &'a FunctionTable,
}

impl<'a> ResponseValidator<'a> {
    pub fn new(table: &'a FunctionTable) -> Self {
        Self { table }
    }

    pub fn validate(&self, raw: &str) -> ValidationReport {
        match extract_payload(raw) {
            Some(payload) => self.validate_value(&payload),
            None => unparsable("response is not JSON"),
        }
    }

    /// Validate an already-parsed payload.
    pub fn validate_value(&self, payload: &Value) -> ValidationReport {
        let Some(cases) = case_list(payload) else {
            return unparsable("no case list in response");
        };

        let mut report = ValidationReport::default();
        for (index, value) in cases.iter().enumerate() {
            match self.validate_case(value) {
                Ok(case) => {
                    report.delta.accept();
                    report.accepted.push(case);
                }
                Err(error) => {
                    let reason = error.reason();
                    debug!(index, reason = reason.as_str(), %error, "rejected candidate case");
                    report.delta.reject(reason);
                    report.rejected.push(Rejection { index, error });
                }
            }
        }

        info!(
            accepted = report.delta.accepted,
            generated = report.delta.generated,
            "validated model response"
        );
        report
    }

    pub fn validate_case(&self, value: &Value) -> Result<ValidatedCase, CandidateError> {
        let candidate = CandidateCase::from_value(value)?;
        let function = self.resolve(&candidate.identifier)?;

        let mut arguments = Vec::with_capacity(function.arity());
        let slots = function.params.iter().zip(&candidate.arguments);
        for (position, (param, raw)) in slots.enumerate() {
            let value = coerce(&param.ty, raw).map_err(|source| CandidateError::TypeSanitize {
                slot: slot_label(function, position),
                source,
            })?;
            arguments.push(value);
        }

        let amount = match &candidate.amount {
            Some(raw) => uint_field("amount", 256, raw)?,
            None => U256::ZERO,
        };
        let block_number = match &candidate.block_number {
            Some(raw) => low_u64(uint_field("blocknumber", 64, raw)?),
            None => 1,
        };
        let timestamp = match &candidate.timestamp {
            Some(raw) => low_u64(uint_field("timestamp", 64, raw)?),
            None => 0,
        };

        if candidate.arguments.len() != function.arity() {
            return Err(CandidateError::ArityMismatch {
                function: function.name.clone(),
                expected: function.arity(),
                found: candidate.arguments.len(),
            });
        }

        Ok(ValidatedCase {
            function: function.id,
            name: function.name.clone(),
            arguments,
            amount,
            block_number,
            timestamp,
        })
    }

    fn resolve(&self, identifier: &Value) -> Result<&'a FunctionSig, CandidateError> {
        match identifier {
            Value::String(s) => self
                .table
                .resolve(s)
                .ok_or_else(|| CandidateError::AbiMismatch(format!("'{s}'"))),
            other => Err(CandidateError::AbiMismatch(other.to_string())),
        }
    }
}

fn unparsable(why: &str) -> ValidationReport {
    debug!(why, "unparsable model response");
    let mut report = ValidationReport::default();
    report.delta.unparsable();
    report
}

fn slot_label(function: &FunctionSig, position: usize) -> String {
    let param = &function.params[position];
    if param.name.is_empty() {
        format!("{}[{position}] ({})", function.name, param.ty)
    } else {
        format!("{}.{} ({})", function.name, param.name, param.ty)
    }
}

fn uint_field(name: &str, bits: usize, raw: &Value) -> Result<U256, CandidateError> {
    match coerce_uint(bits, raw) {
        Ok(AbiValue::Uint(v, _)) => Ok(v),
        Ok(_) => Err(CandidateError::TypeSanitize {
            slot: name.to_string(),
            source: CoerceError::Kind {
                expected: "integer",
                found: "other",
            },
        }),
        Err(source) => Err(CandidateError::TypeSanitize {
            slot: name.to_string(),
            source,
        }),
    }
}

/// Exact for values already checked to fit 64 bits.
fn low_u64(value: U256) -> u64 {
    value.as_limbs()[0]
}

/// The case list inside a payload: a bare array, or an object carrying it
/// under `transactions` or `cases`.
fn case_list(payload: &Value) -> Option<&Vec<Value>> {
    match payload {
        Value::Array(items) => Some(items),
        Value::Object(obj) => envelope_list(obj),
        _ => None,
    }
}

fn envelope_list(obj: &Map<String, Value>) -> Option<&Vec<Value>> {
    ["transactions", "cases"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_array))
}

// ── Payload extraction ───────────────────────────────────────────────

/// Pull a JSON value out of model text: markdown fences are stripped, and
/// if the remainder does not parse the first balanced JSON value is tried.
pub fn extract_payload(raw: &str) -> Option<Value> {
    let body = strip_fences(raw);
    if let Ok(value) = serde_json::from_str(body) {
        return Some(value);
    }
    [body, raw]
        .iter()
        .filter_map(|text| first_balanced(text))
        .find_map(|candidate| serde_json::from_str(candidate).ok())
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };
    let after = &trimmed[open + 3..];
    // Skip the language tag line, e.g. ```json
    let body = match after.find('\n') {
        Some(nl) => &after[nl + 1..],
        None => after,
    };
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

fn first_balanced(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
