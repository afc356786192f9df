use alloy_primitives::{Address, B256, U256};
use serde::Serialize;

use crate::utils::serialize_decimal;

// Decoded from logs, never fetched directly
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenTransfer {
    pub token_address: Address,
    pub from_address: Address,
    pub to_address: Address,
    #[serde(serialize_with = "serialize_decimal")]
    pub value: U256,
    pub transaction_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
    pub block_timestamp: Option<u64>,
    pub block_hash: Option<B256>,
}
