use crate::types::ContractAbi;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn parse_abi(json: &str) -> Result<ContractAbi, ParseError> {
    Ok(serde_json::from_str(json)?)
}

/// Accept either a bare ABI array or a compiler artifact carrying it under `abi`.
pub fn parse_abi_value(value: &serde_json::Value) -> Result<ContractAbi, ParseError> {
    let abi = value.get("abi").unwrap_or(value);
    Ok(serde_json::from_value(abi.clone())?)
}
