use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::metrics::Metrics;
use crate::models::common::{Config, SlowNodeConfig};
use crate::streaming::StreamerAdapter;
use crate::streaming::checkpoint::{CheckpointStore, DeadLetterQueue};

#[derive(Debug, Clone)]
pub struct StreamerSettings {
    pub start_block: Option<u64>,
    pub end_block: Option<u64>,
    pub lag: u64,
    pub period_seconds: u64,
    pub block_batch_size: u64,
    pub retry_errors: bool,
    pub max_cycle_retries: Option<u32>,
    pub retry_delay_seconds: u64,
    pub slow_node: Option<SlowNodeConfig>,
}

impl From<&Config> for StreamerSettings {
    fn from(config: &Config) -> Self {
        Self {
            start_block: config.start_block,
            end_block: config.end_block,
            lag: config.lag,
            period_seconds: config.period_seconds,
            block_batch_size: config.block_batch_size.max(1),
            retry_errors: config.retry_errors,
            max_cycle_retries: config.max_cycle_retries,
            retry_delay_seconds: config.retry_delay_seconds,
            slow_node: config.slow_node,
        }
    }
}

/// The sync loop: picks the next safe block range, exports it and advances the checkpoint.
///
/// Cycles run one at a time, so the checkpoint needs no locking.
pub struct Streamer {
    adapter: Arc<dyn StreamerAdapter>,
    checkpoint: Box<dyn CheckpointStore>,
    dead_letters: Box<dyn DeadLetterQueue>,
    settings: StreamerSettings,
    metrics: Option<Arc<Metrics>>,
    last_synced_block: i64,
}

impl Streamer {
    pub fn new(
        adapter: Arc<dyn StreamerAdapter>,
        checkpoint: Box<dyn CheckpointStore>,
        dead_letters: Box<dyn DeadLetterQueue>,
        settings: StreamerSettings,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            adapter,
            checkpoint,
            dead_letters,
            settings,
            metrics,
            last_synced_block: -1,
        }
    }

    pub fn last_synced_block(&self) -> i64 {
        self.last_synced_block
    }

    /// Runs until `end_block` is synced or a shutdown signal arrives. The adapter is closed on
    /// every exit path.
    pub async fn stream(&mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        self.load_checkpoint().await?;

        self.adapter.open().await?;
        let result = self.run(&mut shutdown).await;
        let closed = self.adapter.close().await;

        result?;
        closed
    }

    async fn load_checkpoint(&mut self) -> Result<()> {
        let stored = self.checkpoint.read().await?;
        self.last_synced_block = match (self.settings.start_block, stored) {
            (Some(start_block), _) => {
                let last = start_block as i64 - 1;
                self.checkpoint.write(last).await?;
                last
            }
            (None, Some(last)) => last,
            (None, None) => {
                self.checkpoint.write(-1).await?;
                -1
            }
        };
        info!("Starting from last synced block {}", self.last_synced_block);
        Ok(())
    }

    async fn run(&mut self, shutdown: &mut broadcast::Receiver<()>) -> Result<()> {
        let period = Duration::from_secs(self.settings.period_seconds);
        let retry_delay = Duration::from_secs(self.settings.retry_delay_seconds);
        let mut consecutive_failures = 0u32;

        loop {
            if self.reached_end_block() {
                info!("Reached end block {}", self.last_synced_block);
                return Ok(());
            }
            if shutdown_requested(shutdown) {
                info!("Shutting down streamer at block {}", self.last_synced_block);
                return Ok(());
            }

            let target_block = match self.calculate_target_block().await {
                Ok(target) => target,
                Err(e) => {
                    error!("Failed to read chain head: {:#}", e);
                    if pause(shutdown, retry_delay).await {
                        return Ok(());
                    }
                    continue;
                }
            };

            if target_block <= self.last_synced_block {
                info!("Nothing to sync. Sleeping for {} seconds...", period.as_secs());
                if pause(shutdown, period).await {
                    return Ok(());
                }
                continue;
            }

            let start_block = (self.last_synced_block + 1) as u64;
            let end_block = target_block as u64;
            let started = Instant::now();

            match self.adapter.export_all(start_block, end_block).await {
                Ok(exported) => {
                    consecutive_failures = 0;
                    self.advance(end_block).await?;
                    info!(
                        "Synced blocks [{}, {}]: {} items in {:.2}s",
                        start_block,
                        end_block,
                        exported,
                        started.elapsed().as_secs_f64()
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.cycles_processed.add(1, &[metrics.chain_label()]);
                        metrics
                            .cycle_duration
                            .record(started.elapsed().as_secs_f64(), &[metrics.chain_label()]);
                    }

                    // A short batch means the backlog is drained
                    let synced = end_block - start_block + 1;
                    if synced < self.settings.block_batch_size && pause(shutdown, period).await {
                        return Ok(());
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    error!(
                        "Failed to sync blocks [{}, {}] (attempt {}): {:#}",
                        start_block, end_block, consecutive_failures, e
                    );

                    let exhausted = self
                        .settings
                        .max_cycle_retries
                        .is_some_and(|max| consecutive_failures >= max);
                    if self.settings.retry_errors && !exhausted {
                        info!(
                            "Retrying blocks [{}, {}] in {} seconds",
                            start_block,
                            end_block,
                            retry_delay.as_secs()
                        );
                        if pause(shutdown, retry_delay).await {
                            return Ok(());
                        }
                        continue;
                    }

                    consecutive_failures = 0;
                    self.dead_letter(start_block, end_block).await;
                    self.advance(end_block).await?;
                }
            }
        }
    }

    fn reached_end_block(&self) -> bool {
        self.settings
            .end_block
            .is_some_and(|end| self.last_synced_block >= end as i64)
    }

    /// `min(head - lag, last + batch size, end block)`, with the head pulled back when the node
    /// itself is behind the network.
    async fn calculate_target_block(&self) -> Result<i64> {
        let head = self.adapter.get_current_block_number().await?;
        let mut safe_head = head as i64 - self.settings.lag as i64;

        if let Some(slow_node) = self.settings.slow_node {
            let head_timestamp = self.adapter.get_block_timestamp(head).await?;
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            let delay = now.saturating_sub(head_timestamp);
            if delay > slow_node.allowed_delay_seconds {
                warn!(
                    "Head block {} is {}s old, falling back {} blocks",
                    head, delay, slow_node.fallback_blocks
                );
                safe_head -= slow_node.fallback_blocks as i64;
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.chain_tip_block.record(head, &[metrics.chain_label()]);
            let lag = (head as i64 - self.last_synced_block).max(0) as u64;
            metrics.chain_tip_lag.record(lag, &[metrics.chain_label()]);
        }

        let mut target = safe_head.min(self.last_synced_block + self.settings.block_batch_size as i64);
        if let Some(end_block) = self.settings.end_block {
            target = target.min(end_block as i64);
        }
        Ok(target)
    }

    async fn advance(&mut self, end_block: u64) -> Result<()> {
        self.checkpoint.write(end_block as i64).await?;
        self.last_synced_block = end_block as i64;
        if let Some(metrics) = &self.metrics {
            metrics
                .last_synced_block
                .record(end_block, &[metrics.chain_label()]);
        }
        Ok(())
    }

    async fn dead_letter(&self, start_block: u64, end_block: u64) {
        warn!("Skipping blocks [{}, {}] after failed sync", start_block, end_block);
        if let Err(e) = self.dead_letters.record(start_block, end_block).await {
            error!(
                "Failed to record dead letter for [{}, {}]: {:#}",
                start_block, end_block, e
            );
        }
        if let Some(metrics) = &self.metrics {
            metrics.dead_letters.add(1, &[metrics.chain_label()]);
        }
    }
}

fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
    match shutdown.try_recv() {
        Ok(()) | Err(TryRecvError::Lagged(_)) => true,
        Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => false,
    }
}

/// Sleeps for `duration`, returning early with `true` if shutdown is requested.
async fn pause(shutdown: &mut broadcast::Receiver<()>, duration: Duration) -> bool {
    tokio::select! {
        _ = sleep(duration) => false,
        signal = shutdown.recv() => match signal {
            // Nobody can signal anymore
            Err(RecvError::Closed) => {
                sleep(duration).await;
                false
            }
            Ok(()) | Err(RecvError::Lagged(_)) => true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::errors::RpcError;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeAdapter {
        head: u64,
        head_timestamp: u64,
        failing: Vec<(u64, u64)>,
        transient: bool,
        exported: Mutex<Vec<(u64, u64)>>,
        attempts: Mutex<Vec<(u64, u64)>>,
        closed: Mutex<bool>,
    }

    #[async_trait]
    impl StreamerAdapter for FakeAdapter {
        async fn open(&self) -> Result<()> {
            Ok(())
        }

        async fn get_current_block_number(&self) -> Result<u64> {
            Ok(self.head)
        }

        async fn get_block_timestamp(&self, _block_number: u64) -> Result<u64> {
            Ok(self.head_timestamp)
        }

        async fn export_all(&self, start_block: u64, end_block: u64) -> Result<usize> {
            self.attempts.lock().unwrap().push((start_block, end_block));
            if self.failing.contains(&(start_block, end_block)) {
                if self.transient {
                    return Err(RpcError::Timeout("node busy".into()).into());
                }
                return Err(anyhow!("malformed block payload"));
            }
            self.exported.lock().unwrap().push((start_block, end_block));
            Ok(1)
        }

        async fn close(&self) -> Result<()> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
    }

    #[derive(Default, Clone)]
    struct MemoryCheckpoint(Arc<Mutex<Option<i64>>>);

    #[async_trait]
    impl CheckpointStore for MemoryCheckpoint {
        async fn read(&self) -> Result<Option<i64>> {
            Ok(*self.0.lock().unwrap())
        }

        async fn write(&self, last_synced_block: i64) -> Result<()> {
            *self.0.lock().unwrap() = Some(last_synced_block);
            Ok(())
        }
    }

    #[derive(Default, Clone)]
    struct MemoryDeadLetters(Arc<Mutex<Vec<(u64, u64)>>>);

    #[async_trait]
    impl DeadLetterQueue for MemoryDeadLetters {
        async fn record(&self, start_block: u64, end_block: u64) -> Result<()> {
            self.0.lock().unwrap().push((start_block, end_block));
            Ok(())
        }
    }

    fn settings() -> StreamerSettings {
        StreamerSettings {
            start_block: None,
            end_block: None,
            lag: 2,
            period_seconds: 0,
            block_batch_size: 10,
            retry_errors: true,
            max_cycle_retries: None,
            retry_delay_seconds: 0,
            slow_node: None,
        }
    }

    fn streamer(
        adapter: Arc<FakeAdapter>,
        settings: StreamerSettings,
    ) -> (Streamer, MemoryCheckpoint, MemoryDeadLetters) {
        let checkpoint = MemoryCheckpoint::default();
        let dead_letters = MemoryDeadLetters::default();
        let streamer = Streamer::new(
            adapter,
            Box::new(checkpoint.clone()),
            Box::new(dead_letters.clone()),
            settings,
            None,
        );
        (streamer, checkpoint, dead_letters)
    }

    fn no_shutdown() -> broadcast::Receiver<()> {
        let (sender, receiver) = broadcast::channel(1);
        // Keep the sender alive for the whole test
        std::mem::forget(sender);
        receiver
    }

    #[tokio::test]
    async fn test_first_cycle_is_capped_by_batch_size() {
        let adapter = Arc::new(FakeAdapter {
            head: 100,
            ..Default::default()
        });
        let (mut streamer, checkpoint, _) = streamer(
            adapter.clone(),
            StreamerSettings {
                end_block: Some(9),
                ..settings()
            },
        );

        streamer.stream(no_shutdown()).await.unwrap();

        assert_eq!(*adapter.exported.lock().unwrap(), vec![(0, 9)]);
        assert_eq!(*checkpoint.0.lock().unwrap(), Some(9));
        assert!(*adapter.closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_target_respects_lag() {
        let adapter = Arc::new(FakeAdapter {
            head: 14,
            ..Default::default()
        });
        let (mut streamer, _, _) = streamer(adapter.clone(), StreamerSettings {
            end_block: Some(12),
            ..settings()
        });

        streamer.stream(no_shutdown()).await.unwrap();
        assert_eq!(*adapter.exported.lock().unwrap(), vec![(0, 9), (10, 12)]);
    }

    #[tokio::test]
    async fn test_failed_range_is_dead_lettered_without_retries() {
        let adapter = Arc::new(FakeAdapter {
            head: 100,
            failing: vec![(10, 19)],
            ..Default::default()
        });
        let (mut streamer, checkpoint, dead_letters) = streamer(
            adapter.clone(),
            StreamerSettings {
                start_block: Some(10),
                end_block: Some(19),
                retry_errors: false,
                ..settings()
            },
        );

        streamer.stream(no_shutdown()).await.unwrap();

        assert_eq!(*dead_letters.0.lock().unwrap(), vec![(10, 19)]);
        assert_eq!(*checkpoint.0.lock().unwrap(), Some(19));
        assert_eq!(streamer.last_synced_block(), 19);
    }

    #[tokio::test]
    async fn test_retries_same_range_until_exhausted() {
        let adapter = Arc::new(FakeAdapter {
            head: 100,
            failing: vec![(0, 9)],
            transient: true,
            ..Default::default()
        });
        let (mut streamer, checkpoint, dead_letters) = streamer(
            adapter.clone(),
            StreamerSettings {
                end_block: Some(19),
                max_cycle_retries: Some(3),
                ..settings()
            },
        );

        streamer.stream(no_shutdown()).await.unwrap();

        let attempts = adapter.attempts.lock().unwrap().clone();
        assert_eq!(attempts, vec![(0, 9), (0, 9), (0, 9), (10, 19)]);
        assert_eq!(*dead_letters.0.lock().unwrap(), vec![(0, 9)]);
        assert_eq!(*checkpoint.0.lock().unwrap(), Some(19));
    }

    #[tokio::test]
    async fn test_existing_checkpoint_is_resumed() {
        let adapter = Arc::new(FakeAdapter {
            head: 100,
            ..Default::default()
        });
        let (mut streamer, checkpoint, _) = streamer(adapter.clone(), StreamerSettings {
            end_block: Some(30),
            ..settings()
        });
        *checkpoint.0.lock().unwrap() = Some(24);

        streamer.stream(no_shutdown()).await.unwrap();
        assert_eq!(*adapter.exported.lock().unwrap(), vec![(25, 30)]);
    }

    #[tokio::test]
    async fn test_slow_node_pulls_target_back() {
        let adapter = Arc::new(FakeAdapter {
            head: 100,
            head_timestamp: 0,
            ..Default::default()
        });
        let (mut streamer, _, _) = streamer(adapter.clone(), StreamerSettings {
            start_block: Some(85),
            end_block: Some(90),
            slow_node: Some(SlowNodeConfig {
                allowed_delay_seconds: 60,
                fallback_blocks: 10,
            }),
            ..settings()
        });
        streamer.load_checkpoint().await.unwrap();

        // head - lag = 98, minus 10 fallback blocks
        let target = streamer.calculate_target_block().await.unwrap();
        assert_eq!(target, 88);
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_streamer() {
        let adapter = Arc::new(FakeAdapter {
            head: 1,
            ..Default::default()
        });
        let (mut streamer, _, _) = streamer(adapter.clone(), StreamerSettings {
            period_seconds: 3600,
            ..settings()
        });

        let (sender, receiver) = broadcast::channel(1);
        let handle = tokio::spawn(async move {
            streamer.stream(receiver).await.map(|_| streamer.last_synced_block())
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        sender.send(()).unwrap();

        let last = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(last, -1);
        assert!(*adapter.closed.lock().unwrap());
    }
}
