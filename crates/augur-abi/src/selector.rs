//! Function selectors: the first four bytes of keccak-256 over the
//! canonical signature `name(type1,type2,...)`.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{hex, keccak256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::types::ParamType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Selector(pub [u8; 4]);

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("Invalid selector literal '{0}'")]
pub struct SelectorParseError(pub String);

impl Selector {
    pub fn from_signature(signature: &str) -> Self {
        let hash = keccak256(signature.as_bytes());
        let mut out = [0u8; 4];
        out.copy_from_slice(&hash[..4]);
        Selector(out)
    }
}

/// Build the canonical signature for a function.
pub fn signature(name: &str, params: &[ParamType]) -> String {
    let types: Vec<String> = params.iter().map(|p| p.to_string()).collect();
    format!("{name}({})", types.join(","))
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Selector {
    type Err = SelectorParseError;

    /// Accepts `0xa9059cbb` or `a9059cbb`, case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.len() != 8 {
            return Err(SelectorParseError(s.to_string()));
        }
        let bytes = hex::decode(digits).map_err(|_| SelectorParseError(s.to_string()))?;
        let mut out = [0u8; 4];
        out.copy_from_slice(&bytes);
        Ok(Selector(out))
    }
}

impl Serialize for Selector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
