use alloy_primitives::{Address, B256, Bytes};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Log {
    pub log_index: u64,
    pub transaction_hash: B256,
    pub transaction_index: u64,
    pub block_hash: B256,
    pub block_number: u64,
    pub address: Address,
    pub data: Bytes,
    pub topics: Vec<B256>,
    pub block_timestamp: Option<u64>,
}
