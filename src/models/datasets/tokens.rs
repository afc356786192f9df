use alloy_primitives::{Address, B256, U256};
use serde::Serialize;

use crate::utils::serialize_decimal_opt;

// Any metadata call may be unimplemented by the contract, so every field is optional.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    pub address: Address,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub decimals: Option<u64>,
    #[serde(serialize_with = "serialize_decimal_opt")]
    pub total_supply: Option<U256>,
    pub block_number: u64,
    pub block_timestamp: Option<u64>,
    pub block_hash: Option<B256>,
}
