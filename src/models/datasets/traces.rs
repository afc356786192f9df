use alloy_primitives::{Address, B256, Bytes, U256};
use serde::Serialize;
use std::fmt;

use crate::utils::serialize_decimal_opt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceType {
    Call,
    Create,
    Suicide,
    Reward,
}

impl TraceType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "call" | "callcode" | "delegatecall" | "staticcall" => Some(TraceType::Call),
            "create" | "create2" => Some(TraceType::Create),
            "suicide" | "selfdestruct" => Some(TraceType::Suicide),
            "reward" => Some(TraceType::Reward),
            _ => None,
        }
    }
}

impl fmt::Display for TraceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TraceType::Call => "call",
            TraceType::Create => "create",
            TraceType::Suicide => "suicide",
            TraceType::Reward => "reward",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace {
    pub block_number: u64,
    pub transaction_hash: Option<B256>,
    pub transaction_index: Option<u64>,
    pub from_address: Option<Address>,
    pub to_address: Option<Address>,
    #[serde(serialize_with = "serialize_decimal_opt")]
    pub value: Option<U256>,
    pub input: Option<Bytes>,
    pub output: Option<Bytes>,
    pub trace_type: TraceType,
    pub call_type: Option<String>,
    pub reward_type: Option<String>,
    pub gas: Option<u64>,
    pub gas_used: Option<u64>,
    pub subtraces: u64,
    pub trace_address: Vec<u64>,
    pub error: Option<String>,
    /// 1 on success, 0 when this trace or any ancestor failed
    pub status: u8,
    pub trace_id: Option<String>,
    /// Position within the block's linearised trace list
    pub trace_index: u64,
    pub block_timestamp: Option<u64>,
    pub block_hash: Option<B256>,
}
