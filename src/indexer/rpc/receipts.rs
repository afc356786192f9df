use alloy_consensus::{Eip658Value, TxReceipt};
use alloy_primitives::B256;
use alloy_rpc_types_eth::{Log as RpcLog, TransactionReceipt};
use anyhow::Result;

use crate::models::datasets::logs::Log;
use crate::models::datasets::receipts::Receipt;
use crate::models::errors::ExtractionError;

pub trait ReceiptParser {
    fn parse_receipt(self) -> Result<(Receipt, Vec<Log>)>;
}

impl ReceiptParser for TransactionReceipt {
    fn parse_receipt(self) -> Result<(Receipt, Vec<Log>)> {
        let transaction_hash = self.transaction_hash;
        let missing = |field: &str| ExtractionError::InvalidPayload {
            entity: "receipt",
            reason: format!("{transaction_hash} has no {field}"),
        };
        let transaction_index = self.transaction_index.ok_or_else(|| missing("transactionIndex"))?;
        let block_hash = self.block_hash.ok_or_else(|| missing("blockHash"))?;
        let block_number = self.block_number.ok_or_else(|| missing("blockNumber"))?;

        let (status, root) = match self.inner.as_receipt().map(|receipt| receipt.status) {
            Some(Eip658Value::Eip658(success)) => (Some(success as u64), None),
            Some(Eip658Value::PostState(root)) => (None, Some(root)),
            None => (None, None),
        };

        let logs = self
            .inner
            .logs()
            .iter()
            .map(|log| parse_log(log, transaction_hash, transaction_index, block_hash, block_number))
            .collect::<Result<Vec<_>>>()?;

        let receipt = Receipt {
            transaction_hash,
            transaction_index,
            block_hash,
            block_number,
            cumulative_gas_used: self.inner.cumulative_gas_used(),
            gas_used: self.gas_used,
            contract_address: self.contract_address,
            root,
            status,
            effective_gas_price: Some(self.effective_gas_price),
        };
        Ok((receipt, logs))
    }
}

// Position fields on a log may be omitted by some nodes; the owning receipt supplies them
fn parse_log(
    log: &RpcLog,
    transaction_hash: B256,
    transaction_index: u64,
    block_hash: B256,
    block_number: u64,
) -> Result<Log> {
    let log_index = log.log_index.ok_or_else(|| ExtractionError::InvalidPayload {
        entity: "log",
        reason: format!("log of {transaction_hash} has no logIndex"),
    })?;
    Ok(Log {
        log_index,
        transaction_hash: log.transaction_hash.unwrap_or(transaction_hash),
        transaction_index: log.transaction_index.unwrap_or(transaction_index),
        block_hash: log.block_hash.unwrap_or(block_hash),
        block_number: log.block_number.unwrap_or(block_number),
        address: log.address(),
        data: log.data().data.clone(),
        topics: log.topics().to_vec(),
        block_timestamp: None,
    })
}
