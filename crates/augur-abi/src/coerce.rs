//! Typed argument coercion.
//!
//! One explicit coercion per ABI type category. Each returns a typed
//! [`AbiValue`] or a [`CoerceError`]; nothing relies on implicit conversion.

use alloy_primitives::{hex, Address, I256, U256};
use serde_json::{json, Value};

use crate::types::ParamType;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CoerceError {
    #[error("expected {expected}, found {found}")]
    Kind {
        expected: &'static str,
        found: &'static str,
    },

    #[error("value {value} does not fit {ty}")]
    OutOfRange { ty: String, value: String },

    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),

    #[error("invalid hex literal '{0}'")]
    InvalidHex(String),

    #[error("{ty} expects {expected} items, found {found}")]
    Length {
        ty: String,
        expected: usize,
        found: usize,
    },

    #[error("element {index}: {source}")]
    Element {
        index: usize,
        #[source]
        source: Box<CoerceError>,
    },
}

/// A value coerced to its declared ABI type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    Uint(U256, usize),
    Int(I256, usize),
    Address(Address),
    Bool(bool),
    FixedBytes(Vec<u8>, usize),
    Bytes(Vec<u8>),
    String(String),
    Array(Vec<AbiValue>),
    FixedArray(Vec<AbiValue>),
    Tuple(Vec<AbiValue>),
}

impl AbiValue {
    /// Whether this value has exactly the shape of `ty`.
    pub fn conforms_to(&self, ty: &ParamType) -> bool {
        match (self, ty) {
            (AbiValue::Uint(_, a), ParamType::Uint(b)) => a == b,
            (AbiValue::Int(_, a), ParamType::Int(b)) => a == b,
            (AbiValue::Address(_), ParamType::Address) => true,
            (AbiValue::Bool(_), ParamType::Bool) => true,
            (AbiValue::FixedBytes(bytes, a), ParamType::FixedBytes(b)) => {
                a == b && bytes.len() == *b
            }
            (AbiValue::Bytes(_), ParamType::Bytes) => true,
            (AbiValue::String(_), ParamType::String) => true,
            (AbiValue::Array(items), ParamType::Array(inner)) => {
                items.iter().all(|item| item.conforms_to(inner))
            }
            (AbiValue::FixedArray(items), ParamType::FixedArray(inner, len)) => {
                items.len() == *len && items.iter().all(|item| item.conforms_to(inner))
            }
            (AbiValue::Tuple(items), ParamType::Tuple(members)) => {
                items.len() == members.len()
                    && items.iter().zip(members).all(|(item, m)| item.conforms_to(m))
            }
            _ => false,
        }
    }

    /// Render for the host fuzzer. Integers that fit 64 bits stay numbers,
    /// wider ones become decimal strings.
    pub fn to_json(&self) -> Value {
        match self {
            AbiValue::Uint(v, _) => match u256_to_u64(v) {
                Some(small) => json!(small),
                None => json!(v.to_string()),
            },
            AbiValue::Int(v, _) => {
                let magnitude = v.unsigned_abs();
                match u256_to_u64(&magnitude) {
                    Some(small) if small <= i64::MAX as u64 => {
                        let small = small as i64;
                        json!(if v.is_negative() { -small } else { small })
                    }
                    _ => json!(v.to_string()),
                }
            }
            AbiValue::Address(a) => json!(format!("0x{}", hex::encode(a.as_slice()))),
            AbiValue::Bool(b) => json!(b),
            AbiValue::FixedBytes(bytes, _) | AbiValue::Bytes(bytes) => {
                json!(format!("0x{}", hex::encode(bytes)))
            }
            AbiValue::String(s) => json!(s),
            AbiValue::Array(items) | AbiValue::FixedArray(items) | AbiValue::Tuple(items) => {
                Value::Array(items.iter().map(AbiValue::to_json).collect())
            }
        }
    }
}

fn u256_to_u64(v: &U256) -> Option<u64> {
    if *v <= U256::from(u64::MAX) {
        Some(v.as_limbs()[0])
    } else {
        None
    }
}

/// Coerce a raw JSON value into the declared type.
pub fn coerce(ty: &ParamType, value: &Value) -> Result<AbiValue, CoerceError> {
    match ty {
        ParamType::Uint(bits) => coerce_uint(*bits, value),
        ParamType::Int(bits) => coerce_int(*bits, value),
        ParamType::Address => coerce_address(value),
        ParamType::Bool => coerce_bool(value),
        ParamType::FixedBytes(size) => coerce_fixed_bytes(*size, value),
        ParamType::Bytes => coerce_bytes(value),
        ParamType::String => coerce_string(value),
        ParamType::Array(inner) => {
            coerce_items(ty, inner, value, None).map(AbiValue::Array)
        }
        ParamType::FixedArray(inner, len) => {
            coerce_items(ty, inner, value, Some(*len)).map(AbiValue::FixedArray)
        }
        ParamType::Tuple(members) => coerce_tuple(ty, members, value),
    }
}

// ── Integers ─────────────────────────────────────────────────────────

pub fn coerce_uint(bits: usize, value: &Value) -> Result<AbiValue, CoerceError> {
    let (negative, magnitude) = parse_integer(value)?;
    if negative && magnitude != U256::ZERO {
        return Err(CoerceError::OutOfRange {
            ty: format!("uint{bits}"),
            value: format!("-{magnitude}"),
        });
    }
    if bits < 256 && magnitude > (U256::from(1u8) << bits) - U256::from(1u8) {
        return Err(CoerceError::OutOfRange {
            ty: format!("uint{bits}"),
            value: magnitude.to_string(),
        });
    }
    Ok(AbiValue::Uint(magnitude, bits))
}

pub fn coerce_int(bits: usize, value: &Value) -> Result<AbiValue, CoerceError> {
    let (negative, magnitude) = parse_integer(value)?;
    let limit = U256::from(1u8) << (bits - 1);
    let fits = if negative {
        magnitude <= limit
    } else {
        magnitude < limit
    };
    if !fits {
        let sign = if negative { "-" } else { "" };
        return Err(CoerceError::OutOfRange {
            ty: format!("int{bits}"),
            value: format!("{sign}{magnitude}"),
        });
    }
    let raw = I256::from_raw(magnitude);
    Ok(AbiValue::Int(if negative { raw.wrapping_neg() } else { raw }, bits))
}

/// Split a JSON integer literal into sign and magnitude.
fn parse_integer(value: &Value) -> Result<(bool, U256), CoerceError> {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                return Ok((false, U256::from(u)));
            }
            if let Some(i) = n.as_i64() {
                return Ok((i < 0, U256::from(i.unsigned_abs())));
            }
            parse_number_literal(&n.to_string())
        }
        Value::String(s) => {
            let trimmed = s.trim();
            let (negative, body) = match trimmed.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, trimmed),
            };
            let parsed = match body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
                Some(digits) if !digits.is_empty() => U256::from_str_radix(digits, 16),
                Some(_) => return Err(CoerceError::InvalidNumber(s.clone())),
                None if !body.is_empty() => U256::from_str_radix(body, 10),
                None => return Err(CoerceError::InvalidNumber(s.clone())),
            };
            let magnitude = parsed.map_err(|_| CoerceError::InvalidNumber(s.clone()))?;
            Ok((negative, magnitude))
        }
        other => Err(CoerceError::Kind {
            expected: "integer",
            found: kind_of(other),
        }),
    }
}

/// Exact integer value of a JSON number literal such as `1e18`, `2.50e1` or
/// a 78-digit decimal. Literals with a non-zero fractional part are rejected.
fn parse_number_literal(literal: &str) -> Result<(bool, U256), CoerceError> {
    let invalid = || CoerceError::InvalidNumber(literal.to_string());
    let (negative, unsigned) = match literal.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, literal),
    };
    let (mantissa, exponent) = match unsigned.split_once(['e', 'E']) {
        Some((m, e)) => (m, e.parse::<i64>().map_err(|_| invalid())?),
        None => (unsigned, 0),
    };
    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if whole.is_empty() || !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let mut digits = format!("{whole}{fraction}");
    let shift = exponent - fraction.len() as i64;
    if shift < 0 {
        let drop = usize::try_from(shift.unsigned_abs()).map_err(|_| invalid())?;
        let keep = digits.len().saturating_sub(drop);
        if digits[keep..].bytes().any(|b| b != b'0') {
            return Err(invalid());
        }
        digits.truncate(keep);
    } else {
        let significant = digits.trim_start_matches('0').len();
        // 2^256 has 78 decimal digits.
        if significant > 0 && significant as i64 + shift > 78 {
            return Err(CoerceError::OutOfRange {
                ty: "uint256".to_string(),
                value: literal.to_string(),
            });
        }
        if significant == 0 {
            digits = "0".to_string();
        } else {
            digits.extend(std::iter::repeat('0').take(shift as usize));
        }
    }
    if digits.is_empty() {
        return Ok((negative, U256::ZERO));
    }

    let magnitude = U256::from_str_radix(&digits, 10).map_err(|_| CoerceError::OutOfRange {
        ty: "uint256".to_string(),
        value: literal.to_string(),
    })?;
    Ok((negative, magnitude))
}

// ── Scalars ──────────────────────────────────────────────────────────

pub fn coerce_address(value: &Value) -> Result<AbiValue, CoerceError> {
    let s = value.as_str().ok_or(CoerceError::Kind {
        expected: "address string",
        found: kind_of(value),
    })?;
    let digits = strip_hex_prefix(s.trim())
        .ok_or_else(|| CoerceError::InvalidHex(s.to_string()))?;
    if digits.len() != 40 {
        return Err(CoerceError::Length {
            ty: "address".to_string(),
            expected: 40,
            found: digits.len(),
        });
    }
    let bytes = hex::decode(digits).map_err(|_| CoerceError::InvalidHex(s.to_string()))?;
    Ok(AbiValue::Address(Address::from_slice(&bytes)))
}

pub fn coerce_bool(value: &Value) -> Result<AbiValue, CoerceError> {
    match value {
        Value::Bool(b) => Ok(AbiValue::Bool(*b)),
        Value::String(s) if s.trim().eq_ignore_ascii_case("true") => Ok(AbiValue::Bool(true)),
        Value::String(s) if s.trim().eq_ignore_ascii_case("false") => Ok(AbiValue::Bool(false)),
        Value::Number(n) if n.as_u64() == Some(0) => Ok(AbiValue::Bool(false)),
        Value::Number(n) if n.as_u64() == Some(1) => Ok(AbiValue::Bool(true)),
        other => Err(CoerceError::Kind {
            expected: "bool",
            found: kind_of(other),
        }),
    }
}

pub fn coerce_fixed_bytes(size: usize, value: &Value) -> Result<AbiValue, CoerceError> {
    let mut bytes = decode_hex_value(value)?;
    if bytes.len() > size {
        return Err(CoerceError::Length {
            ty: format!("bytes{size}"),
            expected: size,
            found: bytes.len(),
        });
    }
    bytes.resize(size, 0);
    Ok(AbiValue::FixedBytes(bytes, size))
}

pub fn coerce_bytes(value: &Value) -> Result<AbiValue, CoerceError> {
    decode_hex_value(value).map(AbiValue::Bytes)
}

pub fn coerce_string(value: &Value) -> Result<AbiValue, CoerceError> {
    match value {
        Value::String(s) => Ok(AbiValue::String(s.clone())),
        other => Err(CoerceError::Kind {
            expected: "string",
            found: kind_of(other),
        }),
    }
}

fn decode_hex_value(value: &Value) -> Result<Vec<u8>, CoerceError> {
    let s = value.as_str().ok_or(CoerceError::Kind {
        expected: "hex string",
        found: kind_of(value),
    })?;
    let trimmed = s.trim();
    let digits = strip_hex_prefix(trimmed).unwrap_or(trimmed);
    if digits.len() % 2 != 0 {
        return Err(CoerceError::InvalidHex(s.to_string()));
    }
    hex::decode(digits).map_err(|_| CoerceError::InvalidHex(s.to_string()))
}

fn strip_hex_prefix(s: &str) -> Option<&str> {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))
}

// ── Composites ───────────────────────────────────────────────────────

fn coerce_items(
    ty: &ParamType,
    inner: &ParamType,
    value: &Value,
    fixed_len: Option<usize>,
) -> Result<Vec<AbiValue>, CoerceError> {
    let items = value.as_array().ok_or(CoerceError::Kind {
        expected: "array",
        found: kind_of(value),
    })?;
    if let Some(len) = fixed_len {
        if items.len() != len {
            return Err(CoerceError::Length {
                ty: ty.to_string(),
                expected: len,
                found: items.len(),
            });
        }
    }
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            coerce(inner, item).map_err(|e| CoerceError::Element {
                index,
                source: Box::new(e),
            })
        })
        .collect()
}

fn coerce_tuple(
    ty: &ParamType,
    members: &[ParamType],
    value: &Value,
) -> Result<AbiValue, CoerceError> {
    let items = value.as_array().ok_or(CoerceError::Kind {
        expected: "tuple array",
        found: kind_of(value),
    })?;
    if items.len() != members.len() {
        return Err(CoerceError::Length {
            ty: ty.to_string(),
            expected: members.len(),
            found: items.len(),
        });
    }
    members
        .iter()
        .zip(items)
        .enumerate()
        .map(|(index, (member, item))| {
            coerce(member, item).map_err(|e| CoerceError::Element {
                index,
                source: Box::new(e),
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(AbiValue::Tuple)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ── Boundary values ──────────────────────────────────────────────────

/// Edge values for a type: zero, one, extremes, empty containers.
pub fn boundary_values(ty: &ParamType) -> Vec<AbiValue> {
    let one = U256::from(1u8);
    match ty {
        ParamType::Uint(bits) => {
            let max = if *bits == 256 {
                U256::MAX
            } else {
                (one << *bits) - one
            };
            vec![
                AbiValue::Uint(U256::ZERO, *bits),
                AbiValue::Uint(one, *bits),
                AbiValue::Uint(max, *bits),
            ]
        }
        ParamType::Int(bits) => {
            let limit = one << (*bits - 1);
            vec![
                AbiValue::Int(I256::from_raw(U256::ZERO), *bits),
                AbiValue::Int(I256::from_raw(one), *bits),
                AbiValue::Int(I256::from_raw(one).wrapping_neg(), *bits),
                AbiValue::Int(I256::from_raw(limit - one), *bits),
                AbiValue::Int(I256::from_raw(limit).wrapping_neg(), *bits),
            ]
        }
        ParamType::Address => vec![
            AbiValue::Address(Address::from_slice(&[0u8; 20])),
            AbiValue::Address(Address::from_slice(&[0xffu8; 20])),
        ],
        ParamType::Bool => vec![AbiValue::Bool(false), AbiValue::Bool(true)],
        ParamType::FixedBytes(size) => vec![
            AbiValue::FixedBytes(vec![0u8; *size], *size),
            AbiValue::FixedBytes(vec![0xffu8; *size], *size),
        ],
        ParamType::Bytes => vec![AbiValue::Bytes(Vec::new()), AbiValue::Bytes(vec![0xffu8; 32])],
        ParamType::String => vec![
            AbiValue::String(String::new()),
            AbiValue::String("A".repeat(256)),
        ],
        ParamType::Array(inner) => {
            let mut values = vec![AbiValue::Array(Vec::new())];
            if let Some(first) = boundary_values(inner).into_iter().last() {
                values.push(AbiValue::Array(vec![first]));
            }
            values
        }
        ParamType::FixedArray(inner, len) => boundary_values(inner)
            .into_iter()
            .take(2)
            .map(|v| AbiValue::FixedArray(vec![v; *len]))
            .collect(),
        ParamType::Tuple(members) => {
            let firsts: Option<Vec<AbiValue>> = members
                .iter()
                .map(|m| boundary_values(m).into_iter().next())
                .collect();
            firsts.map(|v| vec![AbiValue::Tuple(v)]).unwrap_or_default()
        }
    }
}
