use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};

use axum::{Router, http::StatusCode, routing::get};
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Gauge, Histogram, MeterProvider};
use opentelemetry_sdk::metrics::{MetricError, SdkMeterProvider};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;

pub struct Metrics {
    registry: Arc<prometheus::Registry>,
    _provider: SdkMeterProvider,
    pub chain_name: String,

    // Cycle metrics
    pub cycles_processed: Counter<u64>,
    pub last_synced_block: Gauge<u64>,
    pub cycle_duration: Histogram<f64>,
    pub items_exported: Counter<u64>,
    pub dead_letters: Counter<u64>,

    // Chain metrics
    pub chain_tip_block: Gauge<u64>,
    pub chain_tip_lag: Gauge<u64>,

    // RPC metrics
    pub rpc_requests: Counter<u64>,
    pub rpc_errors: Counter<u64>,
    pub rpc_latency: Histogram<f64>,
}

impl Metrics {
    pub fn new(chain_name: String) -> Result<Self, MetricError> {
        let registry = prometheus::Registry::new();

        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = SdkMeterProvider::builder().with_reader(exporter).build();
        let meter = provider.meter("etl_metrics");

        let cycles_processed = meter
            .u64_counter("etl_cycles_processed")
            .with_description("Total number of block ranges exported")
            .build();

        let last_synced_block = meter
            .u64_gauge("etl_last_synced_block_number")
            .with_description("Last block number written to the checkpoint")
            .build();

        let cycle_duration = meter
            .f64_histogram("etl_cycle_duration")
            .with_description("Time spent extracting and exporting one block range")
            .with_boundaries(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0])
            .with_unit("s")
            .build();

        let items_exported = meter
            .u64_counter("etl_items_exported")
            .with_description("Number of items handed to the sink, by entity type")
            .build();

        let dead_letters = meter
            .u64_counter("etl_dead_letters")
            .with_description("Number of block ranges skipped after exhausting retries")
            .build();

        let chain_tip_block = meter
            .u64_gauge("etl_chain_tip_block_number")
            .with_description("Latest block number on chain")
            .build();

        let chain_tip_lag = meter
            .u64_gauge("etl_chain_tip_lag")
            .with_description("Number of blocks behind chain tip")
            .build();

        let rpc_requests = meter
            .u64_counter("etl_rpc_requests")
            .with_description("Number of RPC calls made")
            .build();

        let rpc_errors = meter
            .u64_counter("etl_rpc_errors")
            .with_description("Number of RPC errors encountered")
            .build();

        let rpc_latency = meter
            .f64_histogram("etl_rpc_latency")
            .with_description("RPC batch request latency")
            .with_boundaries(vec![
                0.025, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 1.0, 5.0, 10.0,
            ])
            .with_unit("s")
            .build();

        Ok(Self {
            registry: Arc::new(registry),
            _provider: provider,
            chain_name,
            cycles_processed,
            last_synced_block,
            cycle_duration,
            items_exported,
            dead_letters,
            chain_tip_block,
            chain_tip_lag,
            rpc_requests,
            rpc_errors,
            rpc_latency,
        })
    }

    pub fn chain_label(&self) -> KeyValue {
        KeyValue::new("chain", self.chain_name.clone())
    }

    pub fn method_labels(&self, method: &'static str) -> [KeyValue; 2] {
        [self.chain_label(), KeyValue::new("method", method)]
    }

    pub async fn start_metrics_server(&self, addr: &str, port: u16) -> Result<()> {
        let addr = format!("{addr}:{port}")
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid metrics address {addr}:{port}"))?;
        let registry = self.registry.clone();

        let app = Router::new().route("/metrics", get(move || metrics_handler(registry.clone())));

        // Only used for logging
        let access_url = if addr.ip().is_unspecified() {
            format!("http://localhost:{port}/metrics")
        } else {
            format!("http://{}:{port}/metrics", addr.ip())
        };

        info!(
            "Starting metrics server - binding to {} (accessible at {})",
            addr, access_url
        );

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind metrics server to {addr}"))?;

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Metrics server stopped: {}", e);
            }
        });
        Ok(())
    }

    pub fn render(&self) -> Result<String> {
        encode(&self.registry)
    }
}

fn encode(registry: &prometheus::Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder.encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

async fn metrics_handler(registry: Arc<prometheus::Registry>) -> Result<String, StatusCode> {
    encode(&registry).map_err(|e| {
        error!("Failed to encode metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruments_are_exported() {
        let metrics = Metrics::new("testnet".to_string()).unwrap();
        metrics.cycles_processed.add(1, &[metrics.chain_label()]);
        metrics
            .rpc_requests
            .add(3, &metrics.method_labels("eth_getBlockByNumber"));

        let rendered = metrics.render().unwrap();
        assert!(rendered.contains("etl_cycles_processed"));
        assert!(rendered.contains("eth_getBlockByNumber"));
    }
}
