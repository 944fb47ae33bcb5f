//! Chain-family specific chain-head polling.
//!
//! Different chain families expose their head height through different RPC methods and
//! encode the answer differently: EVM nodes return a `0x`-prefixed hex quantity from
//! `eth_blockNumber`, Solana nodes return a plain integer from `getSlot`. The parser accepts
//! every encoding so that a network configured with a custom method still works.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::UpstreamError;
use crate::types::{JsonRpcRequest, JsonRpcResponse};

/// Chain family served by a network. Selects the default health-check method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainRuntime {
    #[default]
    Ethereum,
    Solana,
}

impl ChainRuntime {
    /// RPC method polled by the health-check round when the network does not override it.
    #[must_use]
    pub fn default_health_check_method(&self) -> &'static str {
        match self {
            Self::Ethereum => "eth_blockNumber",
            Self::Solana => "getSlot",
        }
    }

    /// Builds the chain-head request for `method`.
    #[must_use]
    pub fn head_request(&self, method: &str) -> JsonRpcRequest {
        let params = match self {
            Self::Ethereum => None,
            Self::Solana => Some(serde_json::json!([{ "commitment": "confirmed" }])),
        };
        JsonRpcRequest::new(method, params, serde_json::Value::Number(1.into()))
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ethereum => "ethereum",
            Self::Solana => "solana",
        }
    }
}

impl fmt::Display for ChainRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extracts the block number from a decoded chain-head response.
///
/// # Errors
///
/// Returns [`UpstreamError::RpcError`] when the provider answered with an error object and
/// [`UpstreamError::InvalidBlockNumber`] when `result` is missing or unparsable.
pub fn block_number_from_response(response: &JsonRpcResponse) -> Result<u64, UpstreamError> {
    if let Some(error) = &response.error {
        return Err(UpstreamError::RpcError(error.code, error.message.clone()));
    }
    let result = response
        .result
        .as_ref()
        .ok_or_else(|| UpstreamError::InvalidBlockNumber("missing result".to_string()))?;
    parse_block_number(result)
}

/// Parses a block number encoded as a hex string, a decimal string, or a JSON integer.
///
/// Objects carrying a `number` field (block headers) are accepted as well.
///
/// # Errors
///
/// Returns [`UpstreamError::InvalidBlockNumber`] for negative, fractional, or garbled input.
pub fn parse_block_number(value: &serde_json::Value) -> Result<u64, UpstreamError> {
    match value {
        serde_json::Value::Number(number) => number
            .as_u64()
            .ok_or_else(|| UpstreamError::InvalidBlockNumber(number.to_string())),
        serde_json::Value::String(text) => {
            let text = text.trim();
            let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                Some(hex) if !hex.is_empty() => u64::from_str_radix(hex, 16).ok(),
                Some(_) => None,
                None => text.parse::<u64>().ok(),
            };
            parsed.ok_or_else(|| UpstreamError::InvalidBlockNumber(text.to_string()))
        }
        serde_json::Value::Object(fields) => fields
            .get("number")
            .map(parse_block_number)
            .unwrap_or_else(|| Err(UpstreamError::InvalidBlockNumber("no number field".into()))),
        other => Err(UpstreamError::InvalidBlockNumber(other.to_string())),
    }
}
