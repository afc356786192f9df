use alloy_primitives::B256;
use alloy_rpc_types_trace::parity::LocalizedTransactionTrace;
use anyhow::Result;
use std::collections::HashMap;

use crate::indexer::rpc::RpcCall;
use crate::indexer::rpc::traces::{GethTransactionTrace, TraceParser};
use crate::indexer::transformations::traces::TraceTransformer;
use crate::indexer::{StageContext, decode_all};
use crate::models::common::{StageConfig, TraceApi};
use crate::models::datasets::traces::Trace;
use crate::models::errors::ExtractionError;
use crate::utils::batch_executor::BatchWorkExecutor;

// Nodes reject trace requests spanning several blocks
const TRACE_BATCH_SIZE: usize = 1;

/// Traces for every block in a range, one trace request per block.
pub struct TraceStage {
    executor: BatchWorkExecutor,
    context: StageContext,
    trace_api: TraceApi,
}

impl TraceStage {
    pub fn new(settings: StageConfig, trace_api: TraceApi, context: StageContext) -> Self {
        Self {
            executor: BatchWorkExecutor::new("traces", TRACE_BATCH_SIZE, settings.max_workers),
            context,
            trace_api,
        }
    }

    pub fn executor(&self) -> &BatchWorkExecutor {
        &self.executor
    }

    /// `tx_hashes` maps each block to its transaction hashes in block order; `callTracer`
    /// responses that omit `txHash` are matched by position.
    pub async fn extract(
        &self,
        start: u64,
        end: u64,
        tx_hashes: &HashMap<u64, Vec<B256>>,
    ) -> Result<Vec<Trace>> {
        let items: Vec<(u64, Vec<B256>)> = (start..=end)
            .map(|block| (block, tx_hashes.get(&block).cloned().unwrap_or_default()))
            .collect();

        let context = self.context.clone();
        let trace_api = self.trace_api;
        let per_block = self
            .executor
            .execute(items, move |blocks: Vec<(u64, Vec<B256>)>| {
                let context = context.clone();
                async move { fetch_traces(&context, trace_api, blocks).await }
            })
            .await?;

        let mut traces = Vec::new();
        for mut block_traces in per_block {
            block_traces.calculate_statuses();
            block_traces.calculate_trace_ids();
            traces.extend(block_traces);
        }
        Ok(traces)
    }
}

async fn fetch_traces(
    context: &StageContext,
    trace_api: TraceApi,
    blocks: Vec<(u64, Vec<B256>)>,
) -> Result<Vec<Vec<Trace>>> {
    let (method, calls): (&'static str, Vec<RpcCall>) = match trace_api {
        TraceApi::Parity => (
            "trace_block",
            blocks.iter().map(|(number, _)| RpcCall::trace_block(*number)).collect(),
        ),
        TraceApi::Geth => (
            "debug_traceBlockByNumber",
            blocks
                .iter()
                .map(|(number, _)| RpcCall::debug_trace_block_by_number(*number))
                .collect(),
        ),
    };
    let responses = context.call(&calls, method).await?;

    let mut output = Vec::with_capacity(blocks.len());
    match trace_api {
        TraceApi::Parity => {
            let raw = decode_all::<Vec<LocalizedTransactionTrace>>(responses, method)?;
            for ((block_number, hashes), traces) in blocks.into_iter().zip(raw) {
                let traces = traces.ok_or(ExtractionError::MissingBlock { block_number })?;
                output.push(traces.parse_traces(block_number, &hashes)?);
            }
        }
        TraceApi::Geth => {
            let raw = decode_all::<Vec<GethTransactionTrace>>(responses, method)?;
            for ((block_number, hashes), traces) in blocks.into_iter().zip(raw) {
                let traces = traces.ok_or(ExtractionError::MissingBlock { block_number })?;
                output.push(traces.parse_traces(block_number, &hashes)?);
            }
        }
    }
    Ok(output)
}
