use alloy_primitives::{Address, B256};

// Receipts are never exported on their own; they only enrich transactions.
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub transaction_hash: B256,
    pub transaction_index: u64,
    pub block_hash: B256,
    pub block_number: u64,
    pub cumulative_gas_used: u64,
    pub gas_used: u64,
    pub contract_address: Option<Address>,
    // Pre-Byzantium receipts carry a state root instead of a status
    pub root: Option<B256>,
    pub status: Option<u64>,
    pub effective_gas_price: Option<u128>,
}
