use alloy_consensus::Transaction as _;
use alloy_eips::Typed2718;
use alloy_primitives::B256;
use alloy_rpc_types_eth::{Block as RpcBlock, BlockTransactions, Transaction as RpcTransaction};
use anyhow::Result;

use crate::models::datasets::blocks::Block;
use crate::models::datasets::transactions::Transaction;
use crate::models::errors::ExtractionError;

pub trait BlockParser {
    fn parse_block(self) -> Result<(Block, Vec<Transaction>)>;
}

impl BlockParser for RpcBlock {
    fn parse_block(self) -> Result<(Block, Vec<Transaction>)> {
        let hash = self.header.hash;
        let header = self.header.inner;
        let number = header.number;
        let timestamp = header.timestamp;

        // Requested with full transactions; bare hashes mean the node ignored the flag
        if let BlockTransactions::Hashes(hashes) = &self.transactions {
            if !hashes.is_empty() {
                return Err(ExtractionError::InvalidPayload {
                    entity: "block",
                    reason: format!("block {number} returned transaction hashes instead of objects"),
                }
                .into());
            }
        }

        let transactions = self
            .transactions
            .into_transactions()
            .enumerate()
            .map(|(position, tx)| parse_transaction(tx, number, hash, timestamp, position as u64))
            .collect::<Result<Vec<_>>>()?;

        let block = Block {
            number,
            hash,
            parent_hash: header.parent_hash,
            nonce: header.nonce,
            sha3_uncles: header.ommers_hash,
            logs_bloom: header.logs_bloom,
            transactions_root: header.transactions_root,
            state_root: header.state_root,
            receipts_root: header.receipts_root,
            miner: header.beneficiary,
            difficulty: header.difficulty,
            total_difficulty: self.header.total_difficulty,
            size: self.header.size.and_then(|size| u64::try_from(size).ok()),
            extra_data: header.extra_data,
            gas_limit: header.gas_limit,
            gas_used: header.gas_used,
            timestamp,
            transaction_count: transactions.len() as u64,
            base_fee_per_gas: header.base_fee_per_gas,
        };

        Ok((block, transactions))
    }
}

fn parse_transaction(
    tx: RpcTransaction,
    block_number: u64,
    block_hash: B256,
    block_timestamp: u64,
    position: u64,
) -> Result<Transaction> {
    let hash = *tx.inner.tx_hash();

    // A transaction embedded in a block must agree with the block it came in
    if tx.block_number.is_some_and(|number| number != block_number) {
        return Err(ExtractionError::InvalidPayload {
            entity: "transaction",
            reason: format!("{hash} claims block {:?}, found in {block_number}", tx.block_number),
        }
        .into());
    }

    Ok(Transaction {
        hash,
        nonce: tx.nonce(),
        block_hash: tx.block_hash.unwrap_or(block_hash),
        block_number,
        transaction_index: tx.transaction_index.unwrap_or(position),
        from_address: tx.inner.signer(),
        to_address: tx.to(),
        value: tx.value(),
        gas: tx.gas_limit(),
        gas_price: tx.gas_price(),
        input: tx.input().clone(),
        max_fee_per_gas: tx.is_dynamic_fee().then(|| tx.max_fee_per_gas()),
        max_priority_fee_per_gas: tx.max_priority_fee_per_gas(),
        transaction_type: Some(tx.ty() as u64),
        block_timestamp,
        receipt_cumulative_gas_used: None,
        receipt_gas_used: None,
        receipt_contract_address: None,
        receipt_root: None,
        receipt_status: None,
        receipt_effective_gas_price: None,
    })
}
