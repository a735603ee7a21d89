//! Mutation strategy synthesis (amplify-and-deepen).
//!
//! The model answers the mutation prompt with a loose JSON object keyed by
//! function name. Names are matched against the state functions with a small
//! edit-distance tolerance, and every surviving target is resolved to a
//! parameter position and a perturbation the host can apply.

use std::collections::BTreeMap;

use augur_abi::coerce::{boundary_values, coerce, AbiValue};
use augur_abi::table::{FunctionId, FunctionSig, FunctionTable};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{Map, Value};
use tracing::debug;

use crate::context::ExecutionContext;
use crate::validate::extract_payload;

/// Largest edit distance at which a misspelled name still matches.
pub const MAX_EDIT_DISTANCE: usize = 2;

/// Mutation probability for targeted parameters.
pub const TARGETED_MUTATION_PROBABILITY: f64 = 0.8;

#[derive(Debug, Clone, PartialEq)]
pub enum PerturbationKind {
    /// Pick among the type's edge values.
    BoundaryValue(Vec<AbiValue>),
    /// Let the host draw a fresh value of the declared type.
    TypePreservingRandom,
    /// Reuse a value observed in the interesting execution.
    FromContext(AbiValue),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamTarget {
    pub position: usize,
    pub name: String,
    pub kind: PerturbationKind,
}

impl ParamTarget {
    /// A concrete replacement value, or `None` when the host should
    /// randomize the slot itself.
    pub fn propose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<AbiValue> {
        match &self.kind {
            PerturbationKind::BoundaryValue(values) => values.choose(rng).cloned(),
            PerturbationKind::TypePreservingRandom => None,
            PerturbationKind::FromContext(value) => Some(value.clone()),
        }
    }
}

/// Which parameters of which functions to perturb, for one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationStrategy {
    pub generation: u64,
    pub targeted_probability: f64,
    targets: BTreeMap<FunctionId, Vec<ParamTarget>>,
}

impl MutationStrategy {
    pub fn targets_for(&self, function: &FunctionId) -> &[ParamTarget] {
        self.targets.get(function).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn target(&self, function: &FunctionId, position: usize) -> Option<&ParamTarget> {
        self.targets_for(function)
            .iter()
            .find(|t| t.position == position)
    }

    /// Probability of mutating one argument slot: the targeted probability
    /// for strategy targets, `background` for everything else.
    pub fn mutation_probability(
        &self,
        function: &FunctionId,
        position: usize,
        background: f64,
    ) -> f64 {
        if self.target(function, position).is_some() {
            self.targeted_probability
        } else {
            background
        }
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionId> {
        self.targets.keys()
    }

    pub fn target_count(&self) -> usize {
        self.targets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.target_count() == 0
    }
}

pub struct StrategySynthesizer<'a> {
    table: &'a FunctionTable,
}

impl<'a> StrategySynthesizer<'a> {
    pub fn new(table: &'a FunctionTable) -> Self {
        Self { table }
    }

    /// Turn a mutation response into a strategy for `generation`.
    /// Anything unusable yields `None`.
    pub fn synthesize(
        &self,
        context: &ExecutionContext,
        raw: &str,
        generation: u64,
    ) -> Option<MutationStrategy> {
        let Some(Value::Object(suggestions)) = extract_payload(raw) else {
            debug!(order = context.order, "mutation response is not a JSON object");
            return None;
        };

        let mut targets: BTreeMap<FunctionId, Vec<ParamTarget>> = BTreeMap::new();
        for (key, items) in &suggestions {
            let Some(function) = self.match_function(key) else {
                debug!(function = %key, "no state function matches suggestion");
                continue;
            };
            let Value::Array(items) = items else {
                debug!(function = %function.name, "suggestion is not a list");
                continue;
            };
            let slot = targets.entry(function.id).or_default();
            for item in items {
                match self.target_from_item(function, item, context) {
                    Some(target) if slot.iter().all(|t| t.position != target.position) => {
                        slot.push(target)
                    }
                    Some(_) => {}
                    None => {
                        debug!(function = %function.name, item = %item, "dropping unusable target")
                    }
                }
            }
        }
        targets.retain(|_, t| !t.is_empty());

        if targets.is_empty() {
            debug!(order = context.order, "mutation response named no usable parameters");
            return None;
        }
        let strategy = MutationStrategy {
            generation,
            targeted_probability: TARGETED_MUTATION_PROBABILITY,
            targets,
        };
        debug!(
            generation,
            functions = strategy.targets.len(),
            targets = strategy.target_count(),
            "synthesized mutation strategy"
        );
        Some(strategy)
    }

    fn match_function(&self, key: &str) -> Option<&'a FunctionSig> {
        let key = key.trim();
        closest(self.table.state_functions(), key, |f| f.name.as_str())
    }

    fn target_from_item(
        &self,
        function: &FunctionSig,
        item: &Value,
        context: &ExecutionContext,
    ) -> Option<ParamTarget> {
        match item {
            Value::Object(obj) => self.target_from_object(function, obj, context),
            other => {
                let position = match_param(function, other)?;
                Some(ParamTarget {
                    position,
                    name: function.params[position].name.clone(),
                    kind: PerturbationKind::TypePreservingRandom,
                })
            }
        }
    }

    fn target_from_object(
        &self,
        function: &FunctionSig,
        obj: &Map<String, Value>,
        context: &ExecutionContext,
    ) -> Option<ParamTarget> {
        let position = match_param(function, obj.get("param")?)?;
        let ty = &function.params[position].ty;
        let kind = match obj.get("kind").and_then(Value::as_str).unwrap_or("random") {
            "boundary" => PerturbationKind::BoundaryValue(boundary_values(ty)),
            "random" => PerturbationKind::TypePreservingRandom,
            "from_context" => {
                let value = match obj.get("value") {
                    Some(raw) => coerce(ty, raw).ok()?,
                    None => self.value_from_test_case(function, position, context)?,
                };
                PerturbationKind::FromContext(value)
            }
            _ => return None,
        };
        Some(ParamTarget {
            position,
            name: function.params[position].name.clone(),
            kind,
        })
    }

    /// Argument `position` of the first call to `function` in the captured
    /// test case, when the test case is in the host JSON format.
    fn value_from_test_case(
        &self,
        function: &FunctionSig,
        position: usize,
        context: &ExecutionContext,
    ) -> Option<AbiValue> {
        let parsed: Value = serde_json::from_str(&context.test_case).ok()?;
        let calls = match &parsed {
            Value::Array(items) => items,
            Value::Object(obj) => obj
                .get("transactions")
                .or_else(|| obj.get("cases"))
                .and_then(Value::as_array)?,
            _ => return None,
        };
        calls.iter().find_map(|call| {
            let args = call.get("arguments")?.as_array()?;
            let called = self.table.resolve(args.first()?.as_str()?)?;
            if called.id != function.id {
                return None;
            }
            coerce(&function.params[position].ty, args.get(position + 1)?).ok()
        })
    }
}

/// Resolve a parameter reference: a name (fuzzy) or an index.
fn match_param(function: &FunctionSig, reference: &Value) -> Option<usize> {
    match reference {
        Value::String(name) => {
            let name = name.trim();
            let indexed = function.params.iter().enumerate();
            closest(indexed, name, |(_, p)| p.name.as_str()).map(|(i, _)| i)
        }
        Value::Number(n) => n
            .as_u64()
            .map(|i| i as usize)
            .filter(|&i| i < function.arity()),
        _ => None,
    }
}

/// Exact match first, then the nearest name within [`MAX_EDIT_DISTANCE`].
/// Ties go to the earlier candidate.
fn closest<T, F>(candidates: impl IntoIterator<Item = T>, wanted: &str, name: F) -> Option<T>
where
    F: Fn(&T) -> &str,
{
    let mut best: Option<(usize, T)> = None;
    for candidate in candidates {
        let distance = {
            let candidate_name = name(&candidate);
            if candidate_name == wanted {
                return Some(candidate);
            }
            if candidate_name.is_empty() {
                continue;
            }
            strsim::levenshtein(candidate_name, wanted)
        };
        let better = best.as_ref().map_or(true, |(d, _)| distance < *d);
        if distance <= MAX_EDIT_DISTANCE && better {
            best = Some((distance, candidate));
        }
    }
    best.map(|(_, c)| c)
}
