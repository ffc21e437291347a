//! Worker record store on disk.
//!
//! Active records live in `workers/active/<id>.json`. Cleanup relocates a
//! record into `workers/zombie/<YYYY-MM-DD>/<id>.json`, dated by its
//! `cleaned_at`. The zombie file is written before the active file is
//! removed, so an interrupted relocation leaves a duplicate, never a loss.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::domain::errors::StoreError;
use crate::domain::models::WorkerRecord;
use crate::domain::ports::WorkerStore;
use super::json::{list_dirs, list_json_files, read_json, record_path, remove_if_exists, validate_key, write_json_atomic};
use super::StateLayout;

#[derive(Debug)]
pub struct FsWorkerStore {
    active_dir: PathBuf,
    zombie_dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FsWorkerStore {
    pub fn new(layout: &StateLayout) -> Self {
        Self {
            active_dir: layout.active_workers(),
            zombie_dir: layout.zombie_workers(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Per-worker lock; writes to distinct workers never contend.
    async fn worker_lock(&self, worker_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(worker_id.to_string()).or_default())
    }

    async fn forget_lock(&self, worker_id: &str) {
        let mut locks = self.locks.lock().await;
        if locks.get(worker_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(worker_id);
        }
    }

    async fn zombie_path(&self, worker_id: &str) -> Result<Option<PathBuf>, StoreError> {
        let file_name = format!("{}.json", validate_key(worker_id)?);
        for day in list_dirs(&self.zombie_dir).await?.into_iter().rev() {
            let candidate = day.join(&file_name);
            if tokio::fs::try_exists(&candidate).await? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    async fn read_all(paths: Vec<PathBuf>) -> Result<Vec<WorkerRecord>, StoreError> {
        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(record) = read_json(&path).await? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl WorkerStore for FsWorkerStore {
    async fn insert_active(&self, record: &WorkerRecord) -> Result<(), StoreError> {
        let path = record_path(&self.active_dir, &record.worker_id)?;
        let lock = self.worker_lock(&record.worker_id).await;
        let _guard = lock.lock().await;
        write_json_atomic(&path, record).await
    }

    async fn update_active(&self, record: &WorkerRecord) -> Result<(), StoreError> {
        let path = record_path(&self.active_dir, &record.worker_id)?;
        let lock = self.worker_lock(&record.worker_id).await;
        let _guard = lock.lock().await;
        if !tokio::fs::try_exists(&path).await? {
            return Err(StoreError::NotFound(record.worker_id.clone()));
        }
        write_json_atomic(&path, record).await
    }

    async fn get_active(&self, worker_id: &str) -> Result<Option<WorkerRecord>, StoreError> {
        read_json(&record_path(&self.active_dir, worker_id)?).await
    }

    async fn list_active(&self) -> Result<Vec<WorkerRecord>, StoreError> {
        Self::read_all(list_json_files(&self.active_dir).await?).await
    }

    async fn remove_active(&self, worker_id: &str) -> Result<bool, StoreError> {
        let path = record_path(&self.active_dir, worker_id)?;
        let lock = self.worker_lock(worker_id).await;
        let removed = {
            let _guard = lock.lock().await;
            remove_if_exists(&path).await?
        };
        drop(lock);
        self.forget_lock(worker_id).await;
        Ok(removed)
    }

    async fn find_zombie(&self, worker_id: &str) -> Result<Option<WorkerRecord>, StoreError> {
        match self.zombie_path(worker_id).await? {
            Some(path) => read_json(&path).await,
            None => Ok(None),
        }
    }

    async fn list_zombies(&self) -> Result<Vec<WorkerRecord>, StoreError> {
        let mut paths = Vec::new();
        for day in list_dirs(&self.zombie_dir).await? {
            paths.extend(list_json_files(&day).await?);
        }
        Self::read_all(paths).await
    }

    async fn transition_to_zombie(
        &self,
        worker_id: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<WorkerRecord, StoreError> {
        let active_path = record_path(&self.active_dir, worker_id)?;
        let lock = self.worker_lock(worker_id).await;
        let result = {
            let _guard = lock.lock().await;

            if let Some(existing) = self.find_zombie(worker_id).await? {
                remove_if_exists(&active_path).await?;
                Ok(existing)
            } else {
                let mut record: WorkerRecord = read_json(&active_path)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(worker_id.to_string()))?;
                record.mark_zombie(reason, at);

                let cleaned_at = record.cleanup.as_ref().map_or(at, |c| c.cleaned_at);
                let day_dir = self.zombie_dir.join(cleaned_at.format("%Y-%m-%d").to_string());
                write_json_atomic(&record_path(&day_dir, worker_id)?, &record).await?;
                remove_if_exists(&active_path).await?;
                Ok(record)
            }
        };
        drop(lock);
        self.forget_lock(worker_id).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::WorkerStatus;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn store() -> (TempDir, FsWorkerStore) {
        let dir = TempDir::new().unwrap();
        let store = FsWorkerStore::new(&StateLayout::new(dir.path()));
        (dir, store)
    }

    fn worker(id: &str) -> WorkerRecord {
        WorkerRecord::new(id, "task-1", "scan", "coordinator", 500)
    }

    #[tokio::test]
    async fn test_active_crud() {
        let (_dir, store) = store();
        let mut record = worker("w-1");
        store.insert_active(&record).await.unwrap();

        record.status = WorkerStatus::Active;
        store.update_active(&record).await.unwrap();
        assert_eq!(store.get_active("w-1").await.unwrap(), Some(record));
        assert_eq!(store.list_active().await.unwrap().len(), 1);

        assert!(store.remove_active("w-1").await.unwrap());
        assert!(!store.remove_active("w-1").await.unwrap());
        assert!(matches!(
            store.update_active(&worker("w-1")).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_relocation_into_dated_directory() {
        let (dir, store) = store();
        store.insert_active(&worker("w-1")).await.unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();

        let record = store.transition_to_zombie("w-1", "stale", at).await.unwrap();

        assert_eq!(record.status, WorkerStatus::Zombie);
        assert!(dir
            .path()
            .join("workers/zombie/2024-03-09/w-1.json")
            .exists());
        assert!(!dir.path().join("workers/active/w-1.json").exists());
        assert_eq!(store.find_zombie("w-1").await.unwrap(), Some(record));
        assert_eq!(store.list_zombies().await.unwrap().len(), 1);

        let raw: serde_json::Value = serde_json::from_slice(
            &std::fs::read(dir.path().join("workers/zombie/2024-03-09/w-1.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(raw["status"], "zombie");
        assert_eq!(raw["cleanup"]["automated"], true);
        assert_eq!(raw["cleanup"]["reason"], "stale");
    }

    #[tokio::test]
    async fn test_interrupted_relocation_is_completed() {
        let (_dir, store) = store();
        store.insert_active(&worker("w-1")).await.unwrap();
        let first = store
            .transition_to_zombie("w-1", "stale", Utc::now())
            .await
            .unwrap();
        // Simulate a crash after the zombie write but before the removal.
        store.insert_active(&worker("w-1")).await.unwrap();

        let second = store
            .transition_to_zombie("w-1", "again", Utc::now())
            .await
            .unwrap();

        assert_eq!(first, second);
        assert!(store.get_active("w-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let (_dir, store) = store();
        assert!(matches!(
            store.insert_active(&worker("../escape")).await,
            Err(StoreError::InvalidKey(_))
        ));
    }
}
