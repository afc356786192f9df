use alloy_primitives::{Address, Bytes};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::indexer::rpc::RpcCall;
use crate::indexer::transformations::contracts::{
    ContractClassifier, build_contract, contract_creations,
};
use crate::indexer::{StageContext, decode_all};
use crate::models::common::StageConfig;
use crate::models::datasets::contracts::Contract;
use crate::models::datasets::traces::Trace;
use crate::utils::batch_executor::BatchWorkExecutor;

const METHOD: &str = "eth_getCode";

/// Contracts created by successful `create` traces.
///
/// Bytecode comes from the trace output. Tracers that leave it out get an `eth_getCode` call
/// at the creation block instead.
pub struct ContractStage {
    executor: BatchWorkExecutor,
    context: StageContext,
    classifier: Arc<dyn ContractClassifier>,
}

impl ContractStage {
    pub fn new(
        settings: StageConfig,
        context: StageContext,
        classifier: Arc<dyn ContractClassifier>,
    ) -> Self {
        Self {
            executor: BatchWorkExecutor::new("contracts", settings.batch_size, settings.max_workers),
            context,
            classifier,
        }
    }

    pub async fn extract(&self, traces: &[Trace]) -> Result<Vec<Contract>> {
        let mut bytecodes: HashMap<(Address, u64), Bytes> = HashMap::new();
        let mut missing = Vec::new();
        for trace in contract_creations(traces) {
            let Some(address) = trace.to_address else {
                continue;
            };
            match trace.output.as_ref().filter(|code| !code.is_empty()) {
                Some(code) => {
                    bytecodes.insert((address, trace.block_number), code.clone());
                }
                None => missing.push((address, trace.block_number)),
            }
        }

        if !missing.is_empty() {
            debug!("Fetching bytecode for {} contracts", missing.len());
            let context = self.context.clone();
            let fetched = self
                .executor
                .execute(missing, move |keys: Vec<(Address, u64)>| {
                    let context = context.clone();
                    async move { fetch_code(&context, keys).await }
                })
                .await?;
            bytecodes.extend(fetched);
        }

        Ok(bytecodes
            .into_iter()
            .map(|((address, block_number), bytecode)| {
                build_contract(address, bytecode, block_number, self.classifier.as_ref())
            })
            .collect())
    }
}

async fn fetch_code(
    context: &StageContext,
    keys: Vec<(Address, u64)>,
) -> Result<Vec<((Address, u64), Bytes)>> {
    let calls: Vec<RpcCall> = keys
        .iter()
        .map(|(address, block_number)| RpcCall::get_code(*address, *block_number))
        .collect();
    let responses = context.call(&calls, METHOD).await?;
    let codes = decode_all::<Bytes>(responses, METHOD)?;
    Ok(keys
        .into_iter()
        .zip(codes)
        .map(|(key, code)| (key, code.unwrap_or_default()))
        .collect())
}
