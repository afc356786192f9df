use alloy_primitives::{Address, B64, B256, Bloom, Bytes, U256};
use serde::Serialize;

use crate::utils::{serialize_decimal, serialize_decimal_opt};

/// Block header flattened for export; transactions are emitted as their own rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    pub nonce: B64,
    pub sha3_uncles: B256,
    pub logs_bloom: Bloom,
    pub transactions_root: B256,
    pub state_root: B256,
    pub receipts_root: B256,
    pub miner: Address,
    #[serde(serialize_with = "serialize_decimal")]
    pub difficulty: U256,
    #[serde(serialize_with = "serialize_decimal_opt")]
    pub total_difficulty: Option<U256>,
    pub size: Option<u64>,
    pub extra_data: Bytes,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub transaction_count: u64,
    pub base_fee_per_gas: Option<u64>,
}
