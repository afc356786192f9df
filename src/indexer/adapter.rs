use alloy_primitives::B256;
use anyhow::{Context, Result};
use async_trait::async_trait;
use opentelemetry::KeyValue;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::indexer::StageContext;
use crate::indexer::rpc::provider::ProviderSelector;
use crate::indexer::stages::{BlockStage, ContractStage, ReceiptStage, TokenStage, TraceStage};
use crate::indexer::transformations::contracts::{ContractClassifier, SelectorClassifier};
use crate::indexer::transformations::enrich::{
    enrich_contracts, enrich_logs, enrich_token_transfers, enrich_tokens, enrich_traces,
    enrich_transactions,
};
use crate::indexer::transformations::identity::assign_identity;
use crate::indexer::transformations::token_transfers::TokenTransferExtractor;
use crate::indexer::{get_block_timestamp, get_current_block_number};
use crate::metrics::Metrics;
use crate::models::common::{Config, EntityType, EthItem, ExportItem};
use crate::models::datasets::logs::Log;
use crate::models::datasets::receipts::Receipt;
use crate::models::datasets::traces::Trace;
use crate::storage::ItemExporter;
use crate::streaming::StreamerAdapter;

/// Extraction steps, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Blocks,
    Receipts,
    TokenTransfers,
    Traces,
    Contracts,
    Tokens,
}

/// Steps each entity type needs, upstream dependencies included.
fn required_stages(entity_type: EntityType) -> &'static [Stage] {
    match entity_type {
        EntityType::Block => &[Stage::Blocks],
        EntityType::Transaction | EntityType::Log => &[Stage::Blocks, Stage::Receipts],
        EntityType::TokenTransfer => &[Stage::Blocks, Stage::Receipts, Stage::TokenTransfers],
        EntityType::Trace => &[Stage::Blocks, Stage::Traces],
        EntityType::Contract => &[Stage::Blocks, Stage::Traces, Stage::Contracts],
        EntityType::Token => &[Stage::Blocks, Stage::Traces, Stage::Contracts, Stage::Tokens],
    }
}

/// Which steps to run and which entity types to hand to the sink, resolved once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPlan {
    stages: BTreeSet<Stage>,
    exports: BTreeSet<EntityType>,
}

impl ExportPlan {
    pub fn new(entity_types: &[EntityType]) -> Self {
        let mut stages: BTreeSet<Stage> = entity_types
            .iter()
            .flat_map(|entity_type| required_stages(*entity_type).iter().copied())
            .collect();
        // Blocks anchor every join
        stages.insert(Stage::Blocks);
        Self {
            stages,
            exports: entity_types.iter().copied().collect(),
        }
    }

    pub fn runs(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    pub fn exports(&self, entity_type: EntityType) -> bool {
        self.exports.contains(&entity_type)
    }

    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.stages.iter().copied()
    }
}

/// Runs the extraction stages for one block range and exports the result as one sorted batch.
pub struct EthStreamerAdapter {
    plan: ExportPlan,
    selector: Arc<ProviderSelector>,
    exporter: Arc<dyn ItemExporter>,
    metrics: Option<Arc<Metrics>>,
    blocks: BlockStage,
    receipts: ReceiptStage,
    traces: TraceStage,
    contracts: ContractStage,
    tokens: TokenStage,
}

impl EthStreamerAdapter {
    pub fn new(
        config: &Config,
        selector: Arc<ProviderSelector>,
        exporter: Arc<dyn ItemExporter>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self::with_classifier(config, selector, exporter, metrics, Arc::new(SelectorClassifier))
    }

    pub fn with_classifier(
        config: &Config,
        selector: Arc<ProviderSelector>,
        exporter: Arc<dyn ItemExporter>,
        metrics: Option<Arc<Metrics>>,
        classifier: Arc<dyn ContractClassifier>,
    ) -> Self {
        let context = StageContext::new(selector.clone(), metrics.clone());
        let stages = &config.stages;
        let plan = ExportPlan::new(&config.entity_types);
        debug!("Export plan: {:?}", plan);

        Self {
            plan,
            selector,
            exporter,
            metrics,
            blocks: BlockStage::new(stages.blocks, context.clone()),
            receipts: ReceiptStage::new(stages.receipts, context.clone()),
            traces: TraceStage::new(stages.traces, config.trace_api, context.clone()),
            contracts: ContractStage::new(stages.contracts, context.clone(), classifier),
            tokens: TokenStage::new(stages.tokens, context),
        }
    }

    pub fn plan(&self) -> &ExportPlan {
        &self.plan
    }

    /// Extracts, enriches and sorts `[start_block, end_block]` without exporting it.
    pub async fn extract_range(&self, start_block: u64, end_block: u64) -> Result<Vec<ExportItem>> {
        let plan = &self.plan;

        let (mut blocks, transactions) = self.blocks.extract(start_block, end_block).await?;

        let mut block_tx_hashes: HashMap<u64, Vec<(u64, B256)>> = HashMap::new();
        for tx in &transactions {
            block_tx_hashes
                .entry(tx.block_number)
                .or_default()
                .push((tx.transaction_index, tx.hash));
        }
        let block_tx_hashes: HashMap<u64, Vec<B256>> = block_tx_hashes
            .into_iter()
            .map(|(block, mut hashes)| {
                hashes.sort();
                (block, hashes.into_iter().map(|(_, hash)| hash).collect())
            })
            .collect();

        // Receipts and traces only depend on blocks, so they are fetched together
        let receipts_future = async {
            if !plan.runs(Stage::Receipts) {
                return Ok::<_, anyhow::Error>((Vec::<Receipt>::new(), Vec::<Log>::new()));
            }
            let hashes = transactions.iter().map(|tx| tx.hash).collect();
            self.receipts
                .extract(hashes)
                .await
                .context("failed to extract receipts")
        };
        let traces_future = async {
            if !plan.runs(Stage::Traces) {
                return Ok::<_, anyhow::Error>(Vec::<Trace>::new());
            }
            self.traces
                .extract(start_block, end_block, &block_tx_hashes)
                .await
                .context("failed to extract traces")
        };
        let ((receipts, logs), traces) = tokio::try_join!(receipts_future, traces_future)?;

        let contracts = if plan.runs(Stage::Contracts) {
            self.contracts
                .extract(&traces)
                .await
                .context("failed to extract contracts")?
        } else {
            Vec::new()
        };

        let tokens = if plan.runs(Stage::Tokens) {
            self.tokens
                .extract(&contracts)
                .await
                .context("failed to extract tokens")?
        } else {
            Vec::new()
        };

        let mut items: Vec<EthItem> = Vec::new();

        if plan.exports(EntityType::Block) {
            blocks.sort_by_key(|block| block.number);
            items.extend(blocks.iter().cloned().map(EthItem::Block));
        }

        if plan.exports(EntityType::Transaction) {
            let mut enriched = enrich_transactions(&transactions, &receipts)?;
            enriched.sort_by_key(|tx| (tx.block_number, tx.transaction_index));
            items.extend(enriched.into_iter().map(EthItem::Transaction));
        }

        if plan.exports(EntityType::Log) || plan.runs(Stage::TokenTransfers) {
            let mut enriched = enrich_logs(&blocks, &logs)?;
            enriched.sort_by_key(|log| (log.block_number, log.log_index));

            if plan.exports(EntityType::TokenTransfer) {
                let transfers = enriched.extract_token_transfers();
                let mut transfers = enrich_token_transfers(&blocks, &transfers)?;
                transfers.sort_by_key(|transfer| (transfer.block_number, transfer.log_index));
                // Logs come before transfers in the output
                if plan.exports(EntityType::Log) {
                    items.extend(enriched.into_iter().map(EthItem::Log));
                }
                items.extend(transfers.into_iter().map(EthItem::TokenTransfer));
            } else if plan.exports(EntityType::Log) {
                items.extend(enriched.into_iter().map(EthItem::Log));
            }
        }

        if plan.exports(EntityType::Trace) {
            let mut enriched = enrich_traces(&blocks, &traces)?;
            enriched.sort_by_key(|trace| (trace.block_number, trace.trace_index));
            items.extend(enriched.into_iter().map(EthItem::Trace));
        }

        if plan.exports(EntityType::Contract) {
            let mut enriched = enrich_contracts(&blocks, &contracts)?;
            enriched.sort_by_key(|contract| (contract.block_number, contract.address));
            items.extend(enriched.into_iter().map(EthItem::Contract));
        }

        if plan.exports(EntityType::Token) {
            let mut enriched = enrich_tokens(&blocks, &tokens)?;
            enriched.sort_by_key(|token| (token.block_number, token.address));
            items.extend(enriched.into_iter().map(EthItem::Token));
        }

        Ok(assign_identity(items))
    }

    async fn export_range(&self, start_block: u64, end_block: u64) -> Result<usize> {
        let items = self.extract_range(start_block, end_block).await?;
        let count = items.len();

        if let Some(metrics) = &self.metrics {
            let mut per_type: BTreeMap<EntityType, u64> = BTreeMap::new();
            for item in &items {
                *per_type.entry(item.item.entity_type()).or_default() += 1;
            }
            for (entity_type, exported) in per_type {
                metrics.items_exported.add(
                    exported,
                    &[
                        metrics.chain_label(),
                        KeyValue::new("entity_type", entity_type.to_string()),
                    ],
                );
            }
        }

        self.exporter
            .export_items(items)
            .await
            .with_context(|| format!("failed to export blocks [{start_block}, {end_block}]"))?;
        Ok(count)
    }
}

#[async_trait]
impl StreamerAdapter for EthStreamerAdapter {
    async fn open(&self) -> Result<()> {
        info!(
            "Exporting {:?} using stages {:?}",
            self.plan.exports,
            self.plan.stages().collect::<Vec<_>>()
        );
        self.exporter.open().await
    }

    async fn get_current_block_number(&self) -> Result<u64> {
        get_current_block_number(&self.selector, self.metrics.as_deref()).await
    }

    async fn get_block_timestamp(&self, block_number: u64) -> Result<u64> {
        get_block_timestamp(&self.selector, block_number, self.metrics.as_deref()).await
    }

    async fn export_all(&self, start_block: u64, end_block: u64) -> Result<usize> {
        match self.export_range(start_block, end_block).await {
            Ok(count) => {
                if let Err(e) = self.selector.reset_provider() {
                    warn!("Failed to restore provider order: {}", e);
                }
                Ok(count)
            }
            Err(e) => {
                // Demote the endpoint that just failed
                if let Err(select_error) = self.selector.select_provider() {
                    warn!("Failed to select another provider: {}", select_error);
                }
                Err(e.context(format!("blocks [{start_block}, {end_block}]")))
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.exporter.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_transfers_pull_in_receipts() {
        let plan = ExportPlan::new(&[EntityType::TokenTransfer]);
        assert_eq!(
            plan.stages().collect::<Vec<_>>(),
            vec![Stage::Blocks, Stage::Receipts, Stage::TokenTransfers]
        );
        assert!(plan.exports(EntityType::TokenTransfer));
        assert!(!plan.exports(EntityType::Log));
        assert!(!plan.exports(EntityType::Transaction));
    }

    #[test]
    fn test_tokens_pull_in_traces_and_contracts() {
        let plan = ExportPlan::new(&[EntityType::Token]);
        assert!(plan.runs(Stage::Traces));
        assert!(plan.runs(Stage::Contracts));
        assert!(!plan.runs(Stage::Receipts));
    }

    #[test]
    fn test_blocks_always_run() {
        let plan = ExportPlan::new(&[]);
        assert_eq!(plan.stages().collect::<Vec<_>>(), vec![Stage::Blocks]);
    }
}
