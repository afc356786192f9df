use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::info;

use crate::models::common::ExportItem;
use crate::storage::ItemExporter;

type Writer = BufWriter<Box<dyn AsyncWrite + Send + Unpin>>;

/// One JSON object per line, appended to a file or written to stdout. Each export call is
/// flushed before it returns.
pub struct JsonLinesItemExporter {
    path: Option<PathBuf>,
    writer: Mutex<Option<Writer>>,
}

impl JsonLinesItemExporter {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            writer: Mutex::new(None),
        }
    }

    async fn create_writer(&self) -> Result<Writer> {
        let sink: Box<dyn AsyncWrite + Send + Unpin> = match &self.path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await
                    .with_context(|| format!("failed to open {}", path.display()))?;
                info!("Exporting items to {}", path.display());
                Box::new(file)
            }
            None => Box::new(tokio::io::stdout()),
        };
        Ok(BufWriter::new(sink))
    }
}

#[async_trait]
impl ItemExporter for JsonLinesItemExporter {
    async fn open(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        if writer.is_none() {
            *writer = Some(self.create_writer().await?);
        }
        Ok(())
    }

    async fn export_items(&self, items: Vec<ExportItem>) -> Result<()> {
        let mut guard = self.writer.lock().await;
        if guard.is_none() {
            *guard = Some(self.create_writer().await?);
        }
        let Some(writer) = guard.as_mut() else {
            return Ok(());
        };

        for item in &items {
            let mut line = serde_json::to_vec(item)?;
            line.push(b'\n');
            writer.write_all(&line).await?;
        }
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(mut writer) = self.writer.lock().await.take() {
            writer.flush().await?;
            writer.shutdown().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::common::EthItem;
    use crate::models::datasets::contracts::Contract;
    use alloy_primitives::{Address, Bytes};

    #[tokio::test]
    async fn test_items_are_written_one_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("items.jsonl");
        let exporter = JsonLinesItemExporter::new(Some(path.clone()));

        let item = ExportItem {
            item: EthItem::Contract(Contract {
                address: Address::repeat_byte(0x11),
                bytecode: Bytes::from(vec![0x60, 0x80]),
                function_sighashes: vec!["0x18160ddd".into()],
                is_erc20: false,
                is_erc721: false,
                block_number: 3,
                block_timestamp: Some(10),
                block_hash: None,
            }),
            item_id: Some("contract_3_0x1111111111111111111111111111111111111111".into()),
            item_timestamp: Some("1970-01-01T00:00:10Z".into()),
        };

        exporter.open().await.unwrap();
        exporter.export_items(vec![item.clone(), item]).await.unwrap();
        exporter.close().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["type"], "contract");
        assert_eq!(value["bytecode"], "0x6080");
        assert_eq!(value["address"], "0x1111111111111111111111111111111111111111");
        assert_eq!(value["item_timestamp"], "1970-01-01T00:00:10Z");
    }
}
