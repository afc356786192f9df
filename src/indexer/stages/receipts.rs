use alloy_primitives::B256;
use alloy_rpc_types_eth::TransactionReceipt;
use anyhow::Result;

use crate::indexer::rpc::RpcCall;
use crate::indexer::rpc::receipts::ReceiptParser;
use crate::indexer::{StageContext, decode_all};
use crate::models::common::StageConfig;
use crate::models::datasets::logs::Log;
use crate::models::datasets::receipts::Receipt;
use crate::models::errors::ExtractionError;
use crate::utils::batch_executor::BatchWorkExecutor;
use crate::utils::to_hex;

const METHOD: &str = "eth_getTransactionReceipt";

/// Receipts by transaction hash; each receipt's logs are unpacked inline.
pub struct ReceiptStage {
    executor: BatchWorkExecutor,
    context: StageContext,
}

impl ReceiptStage {
    pub fn new(settings: StageConfig, context: StageContext) -> Self {
        Self {
            executor: BatchWorkExecutor::new("receipts", settings.batch_size, settings.max_workers),
            context,
        }
    }

    pub fn executor(&self) -> &BatchWorkExecutor {
        &self.executor
    }

    pub async fn extract(&self, tx_hashes: Vec<B256>) -> Result<(Vec<Receipt>, Vec<Log>)> {
        let context = self.context.clone();
        let fetched = self
            .executor
            .execute(tx_hashes, move |hashes: Vec<B256>| {
                let context = context.clone();
                async move { fetch_receipts(&context, hashes).await }
            })
            .await?;

        let mut receipts = Vec::with_capacity(fetched.len());
        let mut logs = Vec::new();
        for (receipt, receipt_logs) in fetched {
            receipts.push(receipt);
            logs.extend(receipt_logs);
        }
        Ok((receipts, logs))
    }
}

async fn fetch_receipts(context: &StageContext, hashes: Vec<B256>) -> Result<Vec<(Receipt, Vec<Log>)>> {
    let calls: Vec<RpcCall> = hashes
        .iter()
        .map(|hash| RpcCall::get_transaction_receipt(*hash))
        .collect();
    let responses = context.call(&calls, METHOD).await?;
    let raw_receipts = decode_all::<TransactionReceipt>(responses, METHOD)?;

    hashes
        .into_iter()
        .zip(raw_receipts)
        .map(|(hash, raw)| {
            let raw = raw.ok_or_else(|| ExtractionError::MissingReceipt { tx_hash: to_hex(hash) })?;
            raw.parse_receipt()
        })
        .collect()
}
