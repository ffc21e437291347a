//! `events.jsonl` append-only event stream.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::domain::errors::StoreError;
use crate::domain::models::LifecycleEvent;
use crate::domain::ports::EventStore;
use super::StateLayout;

/// One JSON object per line. Appends are serialized within the process.
#[derive(Debug)]
pub struct FsEventLog {
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl FsEventLog {
    pub fn new(layout: &StateLayout) -> Self {
        Self {
            path: layout.events(),
            append_lock: Mutex::new(()),
        }
    }

    /// Sequence number to continue from: one past the last persisted event.
    pub async fn next_sequence(&self) -> Result<u64, StoreError> {
        Ok(self
            .recent(1)
            .await?
            .last()
            .map_or(0, |e| e.sequence.saturating_add(1)))
    }

    async fn read_all(&self) -> Result<Vec<LifecycleEvent>, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut events = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(event) => events.push(event),
                // A torn final line from a crash mid-append
                Err(e) => warn!(line = index + 1, error = %e, "Skipping malformed event"),
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl EventStore for FsEventLog {
    async fn append(&self, event: &LifecycleEvent) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let _guard = self.append_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<LifecycleEvent>, StoreError> {
        let mut events = self.read_all().await?;
        let skip = events.len().saturating_sub(limit);
        Ok(events.split_off(skip))
    }
}
