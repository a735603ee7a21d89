//! Function lookup table built once per contract under test.
//!
//! Model output names functions loosely (`transfer`, `transfer(address,uint256)`,
//! `0xa9059cbb`), so the table answers all three forms.

use std::collections::HashMap;
use std::fmt;

use serde::{Serialize, Serializer};

use crate::selector::{signature, Selector};
use crate::types::{AbiEntry, ContractAbi, EntryKind, ParamType, TypeError};

/// How the host addresses a callable entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FunctionId {
    Selector(Selector),
    Constructor,
    Fallback,
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionId::Selector(sel) => write!(f, "{sel}"),
            FunctionId::Constructor => write!(f, "constructor"),
            FunctionId::Fallback => write!(f, "fallback"),
        }
    }
}

impl Serialize for FunctionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: ParamType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSig {
    pub id: FunctionId,
    pub name: String,
    pub signature: String,
    pub params: Vec<Param>,
    pub mutates_state: bool,
}

impl FunctionSig {
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn param_types(&self) -> impl Iterator<Item = &ParamType> {
        self.params.iter().map(|p| &p.ty)
    }

    /// `transfer(address _to,uint256 _value)`, the form shown to the model.
    pub fn display_with_names(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                if p.name.is_empty() {
                    p.ty.to_string()
                } else {
                    format!("{} {}", p.ty, p.name)
                }
            })
            .collect();
        format!("{}({})", self.name, params.join(","))
    }
}

/// An ABI entry that could not be turned into a callable signature.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedEntry {
    pub name: String,
    pub error: TypeError,
}

#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    functions: Vec<FunctionSig>,
    by_name: HashMap<String, usize>,
    by_signature: HashMap<String, usize>,
    by_id: HashMap<FunctionId, usize>,
    skipped: Vec<SkippedEntry>,
}

impl FunctionTable {
    pub fn from_abi(abi: &ContractAbi) -> Self {
        let mut table = FunctionTable::default();
        for entry in &abi.entries {
            match entry.kind {
                EntryKind::Function | EntryKind::Constructor | EntryKind::Fallback => {
                    table.insert_entry(entry);
                }
                _ => {}
            }
        }
        table
    }

    fn insert_entry(&mut self, entry: &AbiEntry) {
        let name = match entry.kind {
            EntryKind::Constructor => "constructor".to_string(),
            EntryKind::Fallback => "fallback".to_string(),
            _ => entry.name.clone().unwrap_or_default(),
        };

        let mut params = Vec::with_capacity(entry.inputs.len());
        for input in &entry.inputs {
            match ParamType::from_param(input) {
                Ok(ty) => params.push(Param {
                    name: input.name.clone(),
                    ty,
                }),
                Err(error) => {
                    self.skipped.push(SkippedEntry { name, error });
                    return;
                }
            }
        }

        let types: Vec<ParamType> = params.iter().map(|p| p.ty.clone()).collect();
        let sig = signature(&name, &types);
        let id = match entry.kind {
            EntryKind::Constructor => FunctionId::Constructor,
            EntryKind::Fallback => FunctionId::Fallback,
            _ => FunctionId::Selector(Selector::from_signature(&sig)),
        };

        let index = self.functions.len();
        self.functions.push(FunctionSig {
            id,
            name: name.clone(),
            signature: sig.clone(),
            params,
            mutates_state: entry.mutates_state(),
        });
        // Overloads share a name; the last declaration owns the bare-name lookup.
        self.by_name.insert(name, index);
        self.by_signature.insert(sig, index);
        self.by_id.insert(id, index);
    }

    /// Resolve a model-supplied identifier: name, then canonical signature,
    /// then selector literal.
    pub fn resolve(&self, identifier: &str) -> Option<&FunctionSig> {
        let identifier = identifier.trim();
        if let Some(&index) = self.by_name.get(identifier) {
            return Some(&self.functions[index]);
        }
        let compact: String = identifier.chars().filter(|c| !c.is_whitespace()).collect();
        if let Some(&index) = self.by_signature.get(&compact) {
            return Some(&self.functions[index]);
        }
        let selector: Selector = identifier.parse().ok()?;
        self.get(&FunctionId::Selector(selector))
    }

    pub fn get(&self, id: &FunctionId) -> Option<&FunctionSig> {
        self.by_id.get(id).map(|&index| &self.functions[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &FunctionSig> {
        self.functions.iter()
    }

    /// Functions that can change state, the usual mutation targets.
    pub fn state_functions(&self) -> impl Iterator<Item = &FunctionSig> {
        self.functions.iter().filter(|f| f.mutates_state)
    }

    pub fn names(&self) -> Vec<&str> {
        self.functions.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn skipped(&self) -> &[SkippedEntry] {
        &self.skipped
    }
}
