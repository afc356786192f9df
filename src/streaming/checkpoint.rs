use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

/// Persists the last block number that was fully exported. `-1` means nothing has been synced.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn read(&self) -> Result<Option<i64>>;
    async fn write(&self, last_synced_block: i64) -> Result<()>;
}

/// Records a block range that was skipped after exhausting retries.
#[async_trait]
pub trait DeadLetterQueue: Send + Sync {
    async fn record(&self, start_block: u64, end_block: u64) -> Result<()>;
}

/// A single decimal line, replaced atomically through a temporary file.
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn read(&self) -> Result<Option<i64>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let value = content
                    .trim()
                    .parse::<i64>()
                    .with_context(|| format!("invalid checkpoint in {}", self.path.display()))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", self.path.display())),
        }
    }

    async fn write(&self, last_synced_block: i64) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        tokio::fs::write(&temp, format!("{last_synced_block}\n"))
            .await
            .with_context(|| format!("failed to write {}", temp.display()))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// One empty marker file per skipped range, named `{prefix}{start}-{end}`.
pub struct FileDeadLetterQueue {
    prefix: PathBuf,
}

impl FileDeadLetterQueue {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn marker_path(&self, start_block: u64, end_block: u64) -> PathBuf {
        let mut path = self.prefix.clone().into_os_string();
        path.push(format!("{start_block}-{end_block}"));
        PathBuf::from(path)
    }
}

#[async_trait]
impl DeadLetterQueue for FileDeadLetterQueue {
    async fn record(&self, start_block: u64, end_block: u64) -> Result<()> {
        let path = self.marker_path(start_block, end_block);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, b"")
            .await
            .with_context(|| format!("failed to write dead letter {}", path.display()))?;
        info!("Recorded dead letter {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_checkpoint_roundtrip_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("state").join("last_synced_block.txt"));

        assert_eq!(store.read().await.unwrap(), None);
        store.write(-1).await.unwrap();
        assert_eq!(store.read().await.unwrap(), Some(-1));
        store.write(1234).await.unwrap();
        assert_eq!(store.read().await.unwrap(), Some(1234));

        let content = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(content, "1234\n");
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_synced_block.txt");
        std::fs::write(&path, "not a number").unwrap();
        assert!(FileCheckpointStore::new(path).read().await.is_err());
    }

    #[tokio::test]
    async fn test_dead_letter_marker_is_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut prefix = dir.path().join("dead").into_os_string();
        prefix.push("/range_");
        let queue = FileDeadLetterQueue::new(prefix);

        queue.record(10, 19).await.unwrap();
        let marker = dir.path().join("dead").join("range_10-19");
        assert!(marker.exists());
        assert_eq!(std::fs::metadata(marker).unwrap().len(), 0);
    }
}
