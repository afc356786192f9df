pub mod blocks;
pub mod http;
pub mod provider;
pub mod receipts;
pub mod tokens;
pub mod traces;

use alloy_primitives::{Address, B256, Bytes};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::models::errors::RpcError;
use crate::utils::to_hex;

/// One logical JSON-RPC call inside a batch request.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    pub method: &'static str,
    pub params: Value,
}

impl RpcCall {
    pub fn new(method: &'static str, params: Value) -> Self {
        Self { method, params }
    }

    pub fn block_number() -> Self {
        Self::new("eth_blockNumber", json!([]))
    }

    pub fn get_block_by_number(block_number: u64, full_transactions: bool) -> Self {
        Self::new(
            "eth_getBlockByNumber",
            json!([block_tag(block_number), full_transactions]),
        )
    }

    pub fn get_transaction_receipt(tx_hash: B256) -> Self {
        Self::new("eth_getTransactionReceipt", json!([to_hex(tx_hash)]))
    }

    pub fn get_code(address: Address, block_number: u64) -> Self {
        Self::new("eth_getCode", json!([to_hex(address), block_tag(block_number)]))
    }

    pub fn trace_block(block_number: u64) -> Self {
        Self::new("trace_block", json!([block_tag(block_number)]))
    }

    pub fn debug_trace_block_by_number(block_number: u64) -> Self {
        Self::new(
            "debug_traceBlockByNumber",
            json!([block_tag(block_number), {"tracer": "callTracer", "timeout": "60s"}]),
        )
    }

    pub fn eth_call(to: Address, data: &Bytes, block_number: u64) -> Self {
        Self::new(
            "eth_call",
            json!([{"to": to_hex(to), "data": data.to_string()}, block_tag(block_number)]),
        )
    }
}

pub fn block_tag(block_number: u64) -> String {
    format!("{block_number:#x}")
}

/// Result of one call in a batch: the `result` member, or the JSON-RPC error object.
pub type RpcResponse = Result<Value, RpcError>;

/// A node endpoint able to execute batched JSON-RPC calls.
///
/// `batch` fails as a whole only on transport-level problems. Responses come back in the
/// order of `calls`, whatever order the node answered in.
#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn batch(&self, calls: &[RpcCall]) -> Result<Vec<RpcResponse>, RpcError>;

    async fn call(&self, call: RpcCall) -> Result<Value, RpcError> {
        let method = call.method;
        self.batch(std::slice::from_ref(&call))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RpcError::MalformedResponse(format!("empty response to {method}")))?
    }
}

/// Deserialises one call result; a JSON `null` result maps to `None`.
pub fn decode_response<T: DeserializeOwned>(
    response: RpcResponse,
    method: &str,
) -> Result<Option<T>, RpcError> {
    let value = response?;
    if value.is_null() {
        return Ok(None);
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| RpcError::MalformedResponse(format!("{method}: {e}")))
}

pub fn decode_quantity(value: &Value, method: &str) -> Result<u64, RpcError> {
    value
        .as_str()
        .and_then(|hex| u64::from_str_radix(hex.trim_start_matches("0x"), 16).ok())
        .ok_or_else(|| RpcError::MalformedResponse(format!("{method}: expected hex quantity, got {value}")))
}
