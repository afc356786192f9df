use alloy_primitives::{Address, Bytes};
use anyhow::Result;

use crate::indexer::rpc::tokens::{call_data, decode_string, decode_uint};
use crate::indexer::rpc::{RpcCall, RpcResponse};
use crate::indexer::StageContext;
use crate::models::common::StageConfig;
use crate::models::datasets::contracts::Contract;
use crate::models::datasets::tokens::Token;
use crate::utils::batch_executor::BatchWorkExecutor;

const METHOD: &str = "eth_call";

// Candidates are tried in order; the first that decodes wins
const SYMBOL: [&str; 2] = ["symbol()", "SYMBOL()"];
const NAME: [&str; 2] = ["name()", "NAME()"];
const DECIMALS: [&str; 2] = ["decimals()", "DECIMALS()"];
const TOTAL_SUPPLY: [&str; 1] = ["totalSupply()"];

/// Token metadata for contracts classified as ERC-20 or ERC-721.
pub struct TokenStage {
    executor: BatchWorkExecutor,
    context: StageContext,
}

#[derive(Debug, Clone)]
struct TokenRequest {
    address: Address,
    block_number: u64,
}

impl TokenStage {
    pub fn new(settings: StageConfig, context: StageContext) -> Self {
        Self {
            executor: BatchWorkExecutor::new("tokens", settings.batch_size, settings.max_workers),
            context,
        }
    }

    pub async fn extract(&self, contracts: &[Contract]) -> Result<Vec<Token>> {
        let requests: Vec<TokenRequest> = contracts
            .iter()
            .filter(|c| c.is_erc20 || c.is_erc721)
            .map(|c| TokenRequest {
                address: c.address,
                block_number: c.block_number,
            })
            .collect();
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let context = self.context.clone();
        self.executor
            .execute(requests, move |batch: Vec<TokenRequest>| {
                let context = context.clone();
                async move { fetch_tokens(&context, batch).await }
            })
            .await
    }
}

fn signatures() -> impl Iterator<Item = &'static str> {
    SYMBOL
        .into_iter()
        .chain(NAME)
        .chain(DECIMALS)
        .chain(TOTAL_SUPPLY)
}

async fn fetch_tokens(context: &StageContext, batch: Vec<TokenRequest>) -> Result<Vec<Token>> {
    let per_token = signatures().count();
    let calls: Vec<RpcCall> = batch
        .iter()
        .flat_map(|request| {
            signatures().map(move |signature| {
                RpcCall::eth_call(request.address, &call_data(signature), request.block_number)
            })
        })
        .collect();

    // A transport failure fails the batch; a reverted call only blanks its own field
    let responses = context.call(&calls, METHOD).await?;
    let mut responses = responses.into_iter();

    let mut tokens = Vec::with_capacity(batch.len());
    for request in batch {
        let outputs: Vec<Option<Bytes>> = responses
            .by_ref()
            .take(per_token)
            .map(call_output)
            .collect();
        let (symbol, rest) = outputs.split_at(SYMBOL.len().min(outputs.len()));
        let (name, rest) = rest.split_at(NAME.len().min(rest.len()));
        let (decimals, total_supply) = rest.split_at(DECIMALS.len().min(rest.len()));

        tokens.push(Token {
            address: request.address,
            symbol: first_decoded(symbol, decode_string),
            name: first_decoded(name, decode_string),
            decimals: first_decoded(decimals, decode_uint).and_then(|d| u64::try_from(d).ok()),
            total_supply: first_decoded(total_supply, decode_uint),
            block_number: request.block_number,
            block_timestamp: None,
            block_hash: None,
        });
    }
    Ok(tokens)
}

fn call_output(response: RpcResponse) -> Option<Bytes> {
    let value = response.ok()?;
    serde_json::from_value::<Bytes>(value)
        .ok()
        .filter(|output| !output.is_empty())
}

fn first_decoded<T>(outputs: &[Option<Bytes>], decode: fn(&Bytes) -> Option<T>) -> Option<T> {
    outputs.iter().flatten().find_map(decode)
}
