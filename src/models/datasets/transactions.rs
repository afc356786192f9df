use alloy_primitives::{Address, B256, Bytes, U256};
use serde::Serialize;

use crate::utils::serialize_decimal;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub hash: B256,
    pub nonce: u64,
    pub block_hash: B256,
    pub block_number: u64,
    pub transaction_index: u64,
    pub from_address: Address,
    pub to_address: Option<Address>,
    #[serde(serialize_with = "serialize_decimal")]
    pub value: U256,
    pub gas: u64,
    pub gas_price: Option<u128>,
    pub input: Bytes,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    pub transaction_type: Option<u64>,
    pub block_timestamp: u64,
    // Filled from the matching receipt during enrichment
    pub receipt_cumulative_gas_used: Option<u64>,
    pub receipt_gas_used: Option<u64>,
    pub receipt_contract_address: Option<Address>,
    pub receipt_root: Option<B256>,
    pub receipt_status: Option<u64>,
    pub receipt_effective_gas_price: Option<u128>,
}
