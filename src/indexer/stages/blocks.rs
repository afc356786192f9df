use alloy_rpc_types_eth::Block as RpcBlock;
use anyhow::Result;
use std::collections::BTreeMap;
use tracing::debug;

use crate::indexer::rpc::RpcCall;
use crate::indexer::rpc::blocks::BlockParser;
use crate::indexer::{StageContext, decode_all};
use crate::models::common::StageConfig;
use crate::models::datasets::blocks::Block;
use crate::models::datasets::transactions::Transaction;
use crate::models::errors::ExtractionError;
use crate::utils::batch_executor::BatchWorkExecutor;

const METHOD: &str = "eth_getBlockByNumber";

/// Blocks with their full transaction objects, one `eth_getBlockByNumber` call per block.
pub struct BlockStage {
    executor: BatchWorkExecutor,
    context: StageContext,
}

impl BlockStage {
    pub fn new(settings: StageConfig, context: StageContext) -> Self {
        Self {
            executor: BatchWorkExecutor::new("blocks", settings.batch_size, settings.max_workers),
            context,
        }
    }

    pub fn executor(&self) -> &BatchWorkExecutor {
        &self.executor
    }

    /// Fetches `[start, end]`. Fails if any block is missing or returned more than once.
    pub async fn extract(&self, start: u64, end: u64) -> Result<(Vec<Block>, Vec<Transaction>)> {
        let context = self.context.clone();
        let fetched = self
            .executor
            .execute(start..=end, move |numbers: Vec<u64>| {
                let context = context.clone();
                async move { fetch_blocks(&context, numbers).await }
            })
            .await?;

        let mut by_number: BTreeMap<u64, Vec<(Block, Vec<Transaction>)>> = BTreeMap::new();
        for (block, transactions) in fetched {
            by_number.entry(block.number).or_default().push((block, transactions));
        }

        let mut blocks = Vec::with_capacity(by_number.len());
        let mut transactions = Vec::new();
        for block_number in start..=end {
            let mut entries = by_number
                .remove(&block_number)
                .ok_or(ExtractionError::MissingBlock { block_number })?;
            if entries.len() != 1 {
                return Err(ExtractionError::DuplicateBlock {
                    block_number,
                    count: entries.len(),
                }
                .into());
            }
            if let Some((block, txs)) = entries.pop() {
                blocks.push(block);
                transactions.extend(txs);
            }
        }

        debug!(
            "Extracted {} blocks and {} transactions for [{}, {}]",
            blocks.len(),
            transactions.len(),
            start,
            end
        );
        Ok((blocks, transactions))
    }
}

async fn fetch_blocks(
    context: &StageContext,
    numbers: Vec<u64>,
) -> Result<Vec<(Block, Vec<Transaction>)>> {
    let calls: Vec<RpcCall> = numbers
        .iter()
        .map(|number| RpcCall::get_block_by_number(*number, true))
        .collect();
    let responses = context.call(&calls, METHOD).await?;
    let raw_blocks = decode_all::<RpcBlock>(responses, METHOD)?;

    numbers
        .into_iter()
        .zip(raw_blocks)
        .map(|(block_number, raw)| {
            let raw = raw.ok_or(ExtractionError::MissingBlock { block_number })?;
            if raw.header.inner.number != block_number {
                return Err(ExtractionError::InvalidPayload {
                    entity: "block",
                    reason: format!("requested block {block_number}, got {}", raw.header.inner.number),
                }
                .into());
            }
            raw.parse_block()
        })
        .collect()
}
