//! Heartbeat files.
//!
//! Each worker (or its companion emitter) overwrites
//! `<state_dir>/heartbeats/<worker_id>` with an RFC 3339 timestamp.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::PathBuf;
use uuid::Uuid;

use crate::domain::errors::StoreError;
use crate::domain::ports::HeartbeatRegistry;
use super::json::validate_key;
use super::StateLayout;

#[derive(Debug, Clone)]
pub struct FileHeartbeatRegistry {
    dir: PathBuf,
}

impl FileHeartbeatRegistry {
    pub fn new(layout: &StateLayout) -> Self {
        Self {
            dir: layout.heartbeats(),
        }
    }

    fn path(&self, worker_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.dir.join(validate_key(worker_id)?))
    }

    pub async fn record_at(&self, worker_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let path = self.path(worker_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = self
            .dir
            .join(format!(".{worker_id}.{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, at.to_rfc3339()).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl HeartbeatRegistry for FileHeartbeatRegistry {
    async fn record(&self, worker_id: &str) -> Result<(), StoreError> {
        self.record_at(worker_id, Utc::now()).await
    }

    async fn last_heartbeat(&self, worker_id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let contents = match tokio::fs::read_to_string(self.path(worker_id)?).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        DateTime::parse_from_rfc3339(contents.trim())
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| StoreError::Serialization(format!("heartbeat for {worker_id}: {e}")))
    }

    async fn forget(&self, worker_id: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path(worker_id)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_record_and_read() {
        let dir = TempDir::new().unwrap();
        let registry = FileHeartbeatRegistry::new(&StateLayout::new(dir.path()));
        assert!(registry.last_heartbeat("w-1").await.unwrap().is_none());

        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        registry.record_at("w-1", at).await.unwrap();
        assert_eq!(registry.last_heartbeat("w-1").await.unwrap(), Some(at));

        registry.forget("w-1").await.unwrap();
        registry.forget("w-1").await.unwrap();
        assert!(registry.last_heartbeat("w-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_accepts_offsets_and_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let registry = FileHeartbeatRegistry::new(&StateLayout::new(dir.path()));
        std::fs::create_dir_all(dir.path().join("heartbeats")).unwrap();

        std::fs::write(dir.path().join("heartbeats/w-1"), "2024-01-02T05:04:05+02:00\n").unwrap();
        assert_eq!(
            registry.last_heartbeat("w-1").await.unwrap(),
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
        );

        std::fs::write(dir.path().join("heartbeats/w-2"), "yesterday").unwrap();
        assert!(matches!(
            registry.last_heartbeat("w-2").await,
            Err(StoreError::Serialization(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_pulses_for_one_worker() {
        let dir = TempDir::new().unwrap();
        let registry = FileHeartbeatRegistry::new(&StateLayout::new(dir.path()));
        let base = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .record_at("w-1", base + chrono::Duration::seconds(i))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let last = registry.last_heartbeat("w-1").await.unwrap().unwrap();
        assert!(last >= base && last < base + chrono::Duration::seconds(32));
        let leftovers = std::fs::read_dir(dir.path().join("heartbeats"))
            .unwrap()
            .filter(|entry| {
                entry
                    .as_ref()
                    .is_ok_and(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            })
            .count();
        assert_eq!(leftovers, 0);
    }
}
