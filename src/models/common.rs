use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::models::datasets::blocks::Block;
use crate::models::datasets::contracts::Contract;
use crate::models::datasets::logs::Log;
use crate::models::datasets::token_transfers::TokenTransfer;
use crate::models::datasets::tokens::Token;
use crate::models::datasets::traces::Trace;
use crate::models::datasets::transactions::Transaction;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub address: String,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "0.0.0.0".to_string(),
            port: 9100,
        }
    }
}

/// Request batching and parallelism for one extraction stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub batch_size: usize,
    pub max_workers: usize,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_workers: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StagesConfig {
    pub blocks: StageConfig,
    pub receipts: StageConfig,
    pub traces: StageConfig,
    pub contracts: StageConfig,
    pub tokens: StageConfig,
}

/// Pull the target back when the node's head block is older than `allowed_delay_seconds`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SlowNodeConfig {
    pub allowed_delay_seconds: u64,
    pub fallback_blocks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_chain_name")]
    pub chain_name: String,
    pub provider_uris: Vec<String>,
    #[serde(default = "default_checkpoint_file")]
    pub checkpoint_file: PathBuf,
    #[serde(default = "default_dead_letter_prefix")]
    pub dead_letter_prefix: PathBuf,
    /// JSON-lines destinations; stdout when empty
    #[serde(default, deserialize_with = "one_or_many")]
    pub output: Vec<PathBuf>,
    #[serde(default)]
    pub start_block: Option<u64>,
    #[serde(default)]
    pub end_block: Option<u64>,
    #[serde(default)]
    pub lag: u64,
    #[serde(default = "default_period_seconds")]
    pub period_seconds: u64,
    #[serde(default = "default_block_batch_size")]
    pub block_batch_size: u64,
    #[serde(default = "default_retry_errors")]
    pub retry_errors: bool,
    #[serde(default)]
    pub max_cycle_retries: Option<u32>,
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
    #[serde(default = "EntityType::all")]
    pub entity_types: Vec<EntityType>,
    #[serde(default)]
    pub trace_api: TraceApi,
    #[serde(default)]
    pub stages: StagesConfig,
    #[serde(default)]
    pub slow_node: Option<SlowNodeConfig>,
    #[serde(default = "default_rpc_timeout_seconds")]
    pub rpc_timeout_seconds: u64,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<PathBuf>, D::Error> {
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(path)) => vec![path],
        Some(OneOrMany::Many(paths)) => paths,
    })
}

fn default_chain_name() -> String {
    "ethereum".to_string()
}

fn default_checkpoint_file() -> PathBuf {
    PathBuf::from("last_synced_block.txt")
}

fn default_dead_letter_prefix() -> PathBuf {
    PathBuf::from("dead_letters/")
}

fn default_period_seconds() -> u64 {
    10
}

fn default_block_batch_size() -> u64 {
    10
}

fn default_retry_errors() -> bool {
    true
}

fn default_retry_delay_seconds() -> u64 {
    5
}

fn default_rpc_timeout_seconds() -> u64 {
    60
}

/// Entity families a stream can be asked to export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Block,
    Transaction,
    Log,
    TokenTransfer,
    Trace,
    Contract,
    Token,
}

impl EntityType {
    pub fn all() -> Vec<EntityType> {
        vec![
            EntityType::Block,
            EntityType::Transaction,
            EntityType::Log,
            EntityType::TokenTransfer,
            EntityType::Trace,
            EntityType::Contract,
            EntityType::Token,
        ]
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityType::Block => "block",
            EntityType::Transaction => "transaction",
            EntityType::Log => "log",
            EntityType::TokenTransfer => "token_transfer",
            EntityType::Trace => "trace",
            EntityType::Contract => "contract",
            EntityType::Token => "token",
        };
        f.write_str(name)
    }
}

/// Which trace API the node exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceApi {
    /// `trace_block`, flat traces including block rewards
    #[default]
    Parity,
    /// `debug_traceBlockByNumber` with the built-in `callTracer`
    Geth,
}

/// One entity, tagged with its type for the sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EthItem {
    Block(Block),
    Transaction(Transaction),
    Log(Log),
    TokenTransfer(TokenTransfer),
    Trace(Trace),
    Contract(Contract),
    Token(Token),
}

impl EthItem {
    pub fn entity_type(&self) -> EntityType {
        match self {
            EthItem::Block(_) => EntityType::Block,
            EthItem::Transaction(_) => EntityType::Transaction,
            EthItem::Log(_) => EntityType::Log,
            EthItem::TokenTransfer(_) => EntityType::TokenTransfer,
            EthItem::Trace(_) => EntityType::Trace,
            EthItem::Contract(_) => EntityType::Contract,
            EthItem::Token(_) => EntityType::Token,
        }
    }
}

/// The unit handed to sinks: an entity plus its canonical id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportItem {
    #[serde(flatten)]
    pub item: EthItem,
    pub item_id: Option<String>,
    pub item_timestamp: Option<String>,
}
