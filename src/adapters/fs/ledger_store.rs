//! `ledger.json` store, serialized across processes by an advisory lock on
//! `ledger.json.lock`.

use async_trait::async_trait;
use fs2::FileExt;
use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

use crate::domain::errors::StoreError;
use crate::domain::models::LedgerRecord;
use crate::domain::ports::{LedgerLockGuard, LedgerStore};
use super::json::{read_json, write_json_atomic};
use super::StateLayout;

/// How often a contended lock is retried.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct FsLedgerStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FsLedgerStore {
    pub fn new(layout: &StateLayout) -> Self {
        Self {
            path: layout.ledger(),
            lock_path: layout.ledger_lock(),
        }
    }

    async fn open_lock_file(&self) -> Result<File, StoreError> {
        if let Some(parent) = self.lock_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .await?;
        Ok(file.into_std().await)
    }
}

/// Exclusive lock on the open lock file, released on drop.
struct FileLock {
    file: File,
}

impl LedgerLockGuard for FileLock {}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[async_trait]
impl LedgerStore for FsLedgerStore {
    async fn load(&self) -> Result<Option<LedgerRecord>, StoreError> {
        read_json(&self.path).await
    }

    async fn save(&self, record: &LedgerRecord) -> Result<(), StoreError> {
        write_json_atomic(&self.path, record).await
    }

    async fn lock_exclusive(
        &self,
        timeout: Duration,
    ) -> Result<Option<Box<dyn LedgerLockGuard>>, StoreError> {
        let file = self.open_lock_file().await?;
        let deadline = Instant::now() + timeout;
        let contended = fs2::lock_contended_error().kind();

        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => {
                    let guard: Box<dyn LedgerLockGuard> = Box::new(FileLock { file });
                    return Ok(Some(guard));
                }
                Err(e) if e.kind() == contended => {}
                Err(e) => return Err(e.into()),
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            trace!(path = %self.lock_path.display(), "Ledger lock contended, retrying");
            tokio::time::sleep(LOCK_POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}
