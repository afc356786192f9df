pub mod batch_executor;
pub mod retry;
pub mod work_pool;

use alloy_primitives::U256;
use anyhow::{Context, Result, bail};
use config::{Environment, File};
use serde::Serializer;
use std::path::Path;
use tracing::info;

use crate::models::common::Config;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    info!("Config path: {}", path.to_string_lossy());

    // File values first, then ETL__* environment overrides
    let config: Config = config::Config::builder()
        .add_source(File::from(path))
        .add_source(Environment::with_prefix("ETL").separator("__"))
        .build()
        .context("failed to read config file")?
        .try_deserialize()
        .context("failed to parse config")?;

    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.provider_uris.is_empty() {
        bail!("provider_uris must contain at least one endpoint");
    }
    if config.block_batch_size == 0 {
        bail!("block_batch_size must be at least 1");
    }
    for (stage, settings) in [
        ("blocks", &config.stages.blocks),
        ("receipts", &config.stages.receipts),
        ("traces", &config.stages.traces),
        ("contracts", &config.stages.contracts),
        ("tokens", &config.stages.tokens),
    ] {
        if settings.batch_size == 0 || settings.max_workers == 0 {
            bail!("stage '{stage}' needs batch_size and max_workers of at least 1");
        }
    }
    if let (Some(start), Some(end)) = (config.start_block, config.end_block) {
        if end < start {
            bail!("end_block {end} is before start_block {start}");
        }
    }
    Ok(())
}

/// Lowercase `0x`-prefixed hex for hashes and addresses.
pub fn to_hex<T: std::fmt::LowerHex>(value: T) -> String {
    format!("{value:#x}")
}

pub fn serialize_decimal<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

pub fn serialize_decimal_opt<S: Serializer>(
    value: &Option<U256>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(value) => serializer.serialize_str(&value.to_string()),
        None => serializer.serialize_none(),
    }
}

fn strip_html(error: &str) -> String {
    // If the error contains HTML tags, extract just the text content
    if error.contains("<!doctype html>") || error.contains("<html>") {
        // Remove all HTML tags and return the first non-empty line of text
        error
            .lines()
            .map(|line| line.trim())
            .find(|line| {
                !line.starts_with('<')
                    && !line.ends_with('>')
                    && !line.is_empty()
                    && *line != "html"
                    && *line != "body"
            })
            .unwrap_or(error)
            .to_string()
    } else {
        error.to_string()
    }
}

/// Gateway error pages come back as HTML; keep only the readable part.
pub fn clean_error_body(body: &str) -> String {
    strip_html(body).chars().take(512).collect()
}
