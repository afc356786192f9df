use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::models::common::ExportItem;
use crate::storage::ItemExporter;

/// Sends each cycle's items as one message on a bounded channel.
pub struct ChannelItemExporter {
    sender: Sender<Vec<ExportItem>>,
}

impl ChannelItemExporter {
    pub fn new(capacity: usize) -> (Self, Receiver<Vec<ExportItem>>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl ItemExporter for ChannelItemExporter {
    async fn export_items(&self, items: Vec<ExportItem>) -> Result<()> {
        self.sender
            .send(items)
            .await
            .map_err(|_| anyhow!("export channel receiver dropped"))
    }
}
