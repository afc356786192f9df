pub mod checkpoint;
pub mod streamer;

use anyhow::Result;
use async_trait::async_trait;

pub use checkpoint::{CheckpointStore, DeadLetterQueue, FileCheckpointStore, FileDeadLetterQueue};
pub use streamer::{Streamer, StreamerSettings};

/// What the streamer drives: chain head queries plus one export call per block range.
#[async_trait]
pub trait StreamerAdapter: Send + Sync {
    async fn open(&self) -> Result<()>;

    async fn get_current_block_number(&self) -> Result<u64>;

    async fn get_block_timestamp(&self, block_number: u64) -> Result<u64>;

    /// Extracts and exports `[start_block, end_block]`, returning the number of items exported.
    async fn export_all(&self, start_block: u64, end_block: u64) -> Result<usize>;

    async fn close(&self) -> Result<()>;
}
