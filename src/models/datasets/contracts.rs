use alloy_primitives::{Address, B256, Bytes};
use serde::Serialize;

// Built from successful `create` traces
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contract {
    pub address: Address,
    pub bytecode: Bytes,
    pub function_sighashes: Vec<String>,
    pub is_erc20: bool,
    pub is_erc721: bool,
    pub block_number: u64,
    pub block_timestamp: Option<u64>,
    pub block_hash: Option<B256>,
}
