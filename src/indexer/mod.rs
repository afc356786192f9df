pub mod adapter;
pub mod rpc;
pub mod stages;
pub mod transformations;

use alloy_rpc_types_eth::Header;
use anyhow::Result;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Instant;

use crate::indexer::rpc::provider::ProviderSelector;
use crate::indexer::rpc::{RpcCall, RpcClient, RpcResponse, decode_quantity, decode_response};
use crate::metrics::Metrics;
use crate::models::errors::{ExtractionError, RpcError};
use crate::utils::retry::{RetryConfig, retry};

/// Sends one batch request and records request count, latency and errors per method.
pub async fn execute_batch(
    client: &dyn RpcClient,
    calls: &[RpcCall],
    method: &'static str,
    metrics: Option<&Metrics>,
) -> Result<Vec<RpcResponse>, RpcError> {
    let start = Instant::now();

    if let Some(metrics) = metrics {
        metrics
            .rpc_requests
            .add(calls.len() as u64, &metrics.method_labels(method));
    }

    let result = client.batch(calls).await;

    if let Some(metrics) = metrics {
        metrics
            .rpc_latency
            .record(start.elapsed().as_secs_f64(), &metrics.method_labels(method));

        let errors = match &result {
            Ok(responses) => responses.iter().filter(|r| r.is_err()).count() as u64,
            Err(_) => calls.len() as u64,
        };
        if errors > 0 {
            metrics.rpc_errors.add(errors, &metrics.method_labels(method));
        }
    }

    result
}

/// Decodes every response of a batch, failing on the first RPC error or malformed payload.
pub fn decode_all<T: DeserializeOwned>(
    responses: Vec<RpcResponse>,
    method: &'static str,
) -> Result<Vec<Option<T>>, RpcError> {
    responses
        .into_iter()
        .map(|response| decode_response(response, method))
        .collect()
}

pub async fn get_current_block_number(
    selector: &ProviderSelector,
    metrics: Option<&Metrics>,
) -> Result<u64> {
    let retry_config = RetryConfig::default();
    retry(
        || async {
            let client = selector.current()?;
            let mut responses =
                execute_batch(client.as_ref(), &[RpcCall::block_number()], "eth_blockNumber", metrics)
                    .await?;
            let response = responses
                .pop()
                .ok_or_else(|| RpcError::MalformedResponse("eth_blockNumber: empty batch".into()))??;
            Ok::<_, anyhow::Error>(decode_quantity(&response, "eth_blockNumber")?)
        },
        &retry_config,
        "eth_blockNumber",
    )
    .await
}

pub async fn get_block_timestamp(
    selector: &ProviderSelector,
    block_number: u64,
    metrics: Option<&Metrics>,
) -> Result<u64> {
    let retry_config = RetryConfig::default();
    retry(
        || async {
            let client = selector.current()?;
            let call = RpcCall::get_block_by_number(block_number, false);
            let responses =
                execute_batch(client.as_ref(), &[call], "eth_getBlockByNumber", metrics).await?;
            let block = decode_all::<Header>(responses, "eth_getBlockByNumber")?
                .pop()
                .flatten()
                .ok_or(ExtractionError::MissingBlock { block_number })?;
            Ok::<_, anyhow::Error>(block.inner.timestamp)
        },
        &retry_config,
        "eth_getBlockByNumber",
    )
    .await
}

/// Shared by every stage: where to send calls and where to report them.
#[derive(Clone)]
pub struct StageContext {
    pub selector: Arc<ProviderSelector>,
    pub metrics: Option<Arc<Metrics>>,
}

impl StageContext {
    pub fn new(selector: Arc<ProviderSelector>, metrics: Option<Arc<Metrics>>) -> Self {
        Self { selector, metrics }
    }

    /// Resolves the client at submission time so a failover between batches takes effect.
    pub async fn call(&self, calls: &[RpcCall], method: &'static str) -> Result<Vec<RpcResponse>> {
        let client = self.selector.current()?;
        Ok(execute_batch(client.as_ref(), calls, method, self.metrics.as_deref()).await?)
    }
}
