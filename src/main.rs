use anyhow::{Result, anyhow};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{self, EnvFilter};

use blockchain_etl::indexer::adapter::EthStreamerAdapter;
use blockchain_etl::indexer::rpc::provider::ProviderSelector;
use blockchain_etl::metrics::Metrics;
use blockchain_etl::storage::exporter_for;
use blockchain_etl::streaming::{
    FileCheckpointStore, FileDeadLetterQueue, Streamer, StreamerSettings,
};
use blockchain_etl::utils::load_config;

const DEFAULT_CONFIG_PATH: &str = "config.yml";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    println!();
    info!("=========================== INITIALIZING ===========================");

    // Load config
    let config_path =
        std::env::var("ETL_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = match load_config(&config_path) {
        Ok(config) => {
            info!("Config loaded successfully");
            config
        }
        Err(e) => {
            error!("Failed to load config: {:#}", e);
            return Err(anyhow!(e));
        }
    };

    // Initialize optional metrics
    let metrics = if config.metrics.enabled {
        let metrics = Arc::new(Metrics::new(config.chain_name.clone())?);
        metrics
            .start_metrics_server(&config.metrics.address, config.metrics.port)
            .await?;
        Some(metrics)
    } else {
        info!("Metrics are disabled");
        None
    };

    let selector = Arc::new(ProviderSelector::new(
        config.provider_uris.clone(),
        Duration::from_secs(config.rpc_timeout_seconds),
    )?);
    info!("RPC providers: {:?}", config.provider_uris);

    let exporter = exporter_for(&config.output);
    let adapter = Arc::new(EthStreamerAdapter::new(
        &config,
        selector,
        exporter,
        metrics.clone(),
    ));

    let mut streamer = Streamer::new(
        adapter,
        Box::new(FileCheckpointStore::new(config.checkpoint_file.clone())),
        Box::new(FileDeadLetterQueue::new(config.dead_letter_prefix.clone())),
        StreamerSettings::from(&config),
        metrics,
    );

    // Stop after the current cycle on Ctrl+C
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if let Ok(()) = signal::ctrl_c().await {
            info!("Received Ctrl+C signal, initiating shutdown...");
            let _ = shutdown_tx.send(());
        }
    });

    println!();
    info!("========================= STARTING STREAMER ========================");

    streamer.stream(shutdown_rx).await?;

    info!("Streamer stopped at block {}", streamer.last_synced_block());
    Ok(())
}
