//! `restart_queue/<new_worker_id>.json` store.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::domain::errors::StoreError;
use crate::domain::models::RestartQueueEntry;
use crate::domain::ports::RestartQueue;
use super::json::{list_json_files, read_json, record_path, remove_if_exists, write_json_atomic};
use super::StateLayout;

#[derive(Debug, Clone)]
pub struct FsRestartQueue {
    dir: PathBuf,
}

impl FsRestartQueue {
    pub fn new(layout: &StateLayout) -> Self {
        Self {
            dir: layout.restart_queue(),
        }
    }
}

#[async_trait]
impl RestartQueue for FsRestartQueue {
    async fn enqueue(&self, entry: &RestartQueueEntry) -> Result<(), StoreError> {
        write_json_atomic(&record_path(&self.dir, &entry.new_worker_id)?, entry).await
    }

    async fn list(&self) -> Result<Vec<RestartQueueEntry>, StoreError> {
        let mut entries = Vec::new();
        for path in list_json_files(&self.dir).await? {
            if let Some(entry) = read_json::<RestartQueueEntry>(&path).await? {
                entries.push(entry);
            }
        }
        entries.sort_by_key(|e| e.scheduled_at);
        Ok(entries)
    }

    async fn remove(&self, new_worker_id: &str) -> Result<bool, StoreError> {
        remove_if_exists(&record_path(&self.dir, new_worker_id)?).await
    }
}
