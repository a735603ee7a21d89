use std::fmt;

use serde::{Deserialize, Serialize};

/// A contract interface as emitted by the Solidity compiler: a flat list of entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractAbi {
    pub entries: Vec<AbiEntry>,
}

// ── Entries ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbiEntry {
    #[serde(rename = "type", default = "default_entry_kind")]
    pub kind: EntryKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub inputs: Vec<AbiParam>,
    #[serde(default)]
    pub outputs: Vec<AbiParam>,
    #[serde(rename = "stateMutability", default)]
    pub state_mutability: Option<StateMutability>,
    /// Pre-0.5 compilers mark read-only functions with `constant` instead.
    #[serde(default)]
    pub constant: Option<bool>,
}

/// Solidity allows the `type` key to be omitted, in which case it means `function`.
fn default_entry_kind() -> EntryKind {
    EntryKind::Function
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Function,
    Constructor,
    Fallback,
    Receive,
    Event,
    Error,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateMutability {
    Pure,
    View,
    Nonpayable,
    Payable,
}

impl AbiEntry {
    /// Whether calling this entry can change contract state.
    pub fn mutates_state(&self) -> bool {
        match self.state_mutability {
            Some(StateMutability::Pure) | Some(StateMutability::View) => false,
            Some(_) => true,
            None => !self.constant.unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbiParam {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<AbiParam>,
}

// ── Parameter types ──────────────────────────────────────────────────

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum TypeError {
    #[error("Unknown ABI type '{0}'")]
    Unknown(String),

    #[error("Invalid bit width in '{0}'")]
    InvalidWidth(String),

    #[error("Invalid array length in '{0}'")]
    InvalidArrayLength(String),
}

/// A resolved ABI parameter type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamType {
    Uint(usize),
    Int(usize),
    Address,
    Bool,
    FixedBytes(usize),
    Bytes,
    String,
    Array(Box<ParamType>),
    FixedArray(Box<ParamType>, usize),
    Tuple(Vec<ParamType>),
}

impl ParamType {
    /// Resolve a declared parameter, using its components for tuple types.
    pub fn from_param(param: &AbiParam) -> Result<Self, TypeError> {
        Self::parse(&param.ty, &param.components)
    }

    /// Parse a type string such as `uint256`, `bytes32[]` or `tuple[2]`.
    pub fn parse(ty: &str, components: &[AbiParam]) -> Result<Self, TypeError> {
        let ty = ty.trim();

        if let Some(stripped) = ty.strip_suffix(']') {
            let open = stripped
                .rfind('[')
                .ok_or_else(|| TypeError::InvalidArrayLength(ty.to_string()))?;
            let inner = Self::parse(&stripped[..open], components)?;
            let len = &stripped[open + 1..];
            if len.is_empty() {
                return Ok(ParamType::Array(Box::new(inner)));
            }
            let len: usize = len
                .parse()
                .map_err(|_| TypeError::InvalidArrayLength(ty.to_string()))?;
            if len == 0 {
                return Err(TypeError::InvalidArrayLength(ty.to_string()));
            }
            return Ok(ParamType::FixedArray(Box::new(inner), len));
        }

        match ty {
            "address" => return Ok(ParamType::Address),
            "bool" => return Ok(ParamType::Bool),
            "bytes" => return Ok(ParamType::Bytes),
            "string" => return Ok(ParamType::String),
            "uint" => return Ok(ParamType::Uint(256)),
            "int" => return Ok(ParamType::Int(256)),
            "tuple" => {
                let members = components
                    .iter()
                    .map(ParamType::from_param)
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(ParamType::Tuple(members));
            }
            _ => {}
        }

        if let Some(bits) = ty.strip_prefix("uint") {
            return Ok(ParamType::Uint(parse_width(ty, bits)?));
        }
        if let Some(bits) = ty.strip_prefix("int") {
            return Ok(ParamType::Int(parse_width(ty, bits)?));
        }
        if let Some(size) = ty.strip_prefix("bytes") {
            let size: usize = size
                .parse()
                .map_err(|_| TypeError::InvalidWidth(ty.to_string()))?;
            if size == 0 || size > 32 {
                return Err(TypeError::InvalidWidth(ty.to_string()));
            }
            return Ok(ParamType::FixedBytes(size));
        }

        Err(TypeError::Unknown(ty.to_string()))
    }

    /// Short category name used in error messages and prompts.
    pub fn category(&self) -> &'static str {
        match self {
            ParamType::Uint(_) => "uint",
            ParamType::Int(_) => "int",
            ParamType::Address => "address",
            ParamType::Bool => "bool",
            ParamType::FixedBytes(_) => "fixed bytes",
            ParamType::Bytes => "bytes",
            ParamType::String => "string",
            ParamType::Array(_) => "array",
            ParamType::FixedArray(_, _) => "fixed array",
            ParamType::Tuple(_) => "tuple",
        }
    }
}

fn parse_width(ty: &str, bits: &str) -> Result<usize, TypeError> {
    let bits: usize = bits
        .parse()
        .map_err(|_| TypeError::InvalidWidth(ty.to_string()))?;
    if bits == 0 || bits > 256 || bits % 8 != 0 {
        return Err(TypeError::InvalidWidth(ty.to_string()));
    }
    Ok(bits)
}

/// Canonical form, as used in function signatures.
impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Uint(bits) => write!(f, "uint{bits}"),
            ParamType::Int(bits) => write!(f, "int{bits}"),
            ParamType::Address => write!(f, "address"),
            ParamType::Bool => write!(f, "bool"),
            ParamType::FixedBytes(size) => write!(f, "bytes{size}"),
            ParamType::Bytes => write!(f, "bytes"),
            ParamType::String => write!(f, "string"),
            ParamType::Array(inner) => write!(f, "{inner}[]"),
            ParamType::FixedArray(inner, len) => write!(f, "{inner}[{len}]"),
            ParamType::Tuple(members) => {
                write!(f, "(")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{member}")?;
                }
                write!(f, ")")
            }
        }
    }
}
