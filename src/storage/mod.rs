pub mod channel;
pub mod json_lines;

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::models::common::ExportItem;

pub use channel::ChannelItemExporter;
pub use json_lines::JsonLinesItemExporter;

/// A destination for exported items. One `export_items` call carries one cycle's items,
/// already sorted.
#[async_trait]
pub trait ItemExporter: Send + Sync {
    async fn open(&self) -> Result<()> {
        Ok(())
    }

    async fn export_items(&self, items: Vec<ExportItem>) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// One JSON-lines exporter per configured path, fanned out when there are several.
pub fn exporter_for(outputs: &[PathBuf]) -> Arc<dyn ItemExporter> {
    match outputs {
        [] => Arc::new(JsonLinesItemExporter::new(None)),
        [path] => Arc::new(JsonLinesItemExporter::new(Some(path.clone()))),
        paths => Arc::new(MultiItemExporter::new(
            paths
                .iter()
                .map(|path| Arc::new(JsonLinesItemExporter::new(Some(path.clone()))) as Arc<dyn ItemExporter>)
                .collect(),
        )),
    }
}

/// Fans every call out to several exporters in order.
pub struct MultiItemExporter {
    exporters: Vec<Arc<dyn ItemExporter>>,
}

impl MultiItemExporter {
    pub fn new(exporters: Vec<Arc<dyn ItemExporter>>) -> Self {
        Self { exporters }
    }
}

#[async_trait]
impl ItemExporter for MultiItemExporter {
    async fn open(&self) -> Result<()> {
        for exporter in &self.exporters {
            exporter.open().await?;
        }
        Ok(())
    }

    async fn export_items(&self, items: Vec<ExportItem>) -> Result<()> {
        if let Some((last, rest)) = self.exporters.split_last() {
            for exporter in rest {
                exporter.export_items(items.clone()).await?;
            }
            last.export_items(items).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // Close everything even if one of them fails
        let mut first_error = None;
        for exporter in &self.exporters {
            if let Err(e) = exporter.close().await {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
