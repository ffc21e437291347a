//! Dated archive of a cleaned-up worker's logs and process metadata.
//!
//! Copies `<log_dir>/<worker_id>[.*]` and `<pid_dir>/<worker_id>.*` into
//! `<archive_dir>/<YYYY-MM-DD>/<worker_id>/` next to a `metadata.json`
//! snapshot of the worker record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::errors::StoreError;
use crate::domain::models::WorkerRecord;
use crate::domain::ports::{ArchiveReport, LogArchiver};
use super::json::{validate_key, write_json_atomic};

#[derive(Debug, Clone)]
pub struct FsLogArchiver {
    log_dir: PathBuf,
    pid_dir: PathBuf,
    archive_dir: PathBuf,
}

#[derive(Serialize)]
struct ArchiveMetadata<'a> {
    archived_at: DateTime<Utc>,
    worker: &'a WorkerRecord,
    files: &'a [String],
}

impl FsLogArchiver {
    pub fn new(
        log_dir: impl Into<PathBuf>,
        pid_dir: impl Into<PathBuf>,
        archive_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            log_dir: log_dir.into(),
            pid_dir: pid_dir.into(),
            archive_dir: archive_dir.into(),
        }
    }

    /// Files in `dir` belonging to `worker_id`: the bare id or `<id>.<suffix>`.
    async fn worker_files(dir: &Path, worker_id: &str) -> Result<Vec<PathBuf>, StoreError> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let prefix = format!("{worker_id}.");
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if (name == worker_id || name.starts_with(&prefix)) && entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl LogArchiver for FsLogArchiver {
    async fn archive(
        &self,
        worker: &WorkerRecord,
        at: DateTime<Utc>,
    ) -> Result<ArchiveReport, StoreError> {
        let worker_id = validate_key(&worker.worker_id)?;
        let dest = self
            .archive_dir
            .join(at.format("%Y-%m-%d").to_string())
            .join(worker_id);
        tokio::fs::create_dir_all(&dest).await?;

        let mut sources = Self::worker_files(&self.log_dir, worker_id).await?;
        sources.extend(Self::worker_files(&self.pid_dir, worker_id).await?);

        let mut archived = Vec::with_capacity(sources.len());
        for source in sources {
            let Some(name) = source.file_name() else {
                continue;
            };
            tokio::fs::copy(&source, dest.join(name)).await?;
            archived.push(name.to_string_lossy().into_owned());
        }
        debug!(worker_id, files = archived.len(), "Copied worker files to archive");

        write_json_atomic(
            &dest.join("metadata.json"),
            &ArchiveMetadata {
                archived_at: at,
                worker,
                files: &archived,
            },
        )
        .await?;

        Ok(ArchiveReport {
            location: dest.display().to_string(),
            files_archived: archived.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_archives_only_matching_files() {
        let root = TempDir::new().unwrap();
        let logs = root.path().join("logs");
        let pids = root.path().join("pids");
        std::fs::create_dir_all(&logs).unwrap();
        std::fs::create_dir_all(&pids).unwrap();
        std::fs::write(logs.join("w-1.log"), "hello").unwrap();
        std::fs::write(logs.join("w-1.err.log"), "oops").unwrap();
        std::fs::write(logs.join("w-10.log"), "other worker").unwrap();
        std::fs::write(pids.join("w-1.pid"), "4242").unwrap();

        let archiver = FsLogArchiver::new(&logs, &pids, root.path().join("archive"));
        let worker = WorkerRecord::new("w-1", "t", "scan", "o", 10);
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        let report = archiver.archive(&worker, at).await.unwrap();

        assert_eq!(report.files_archived, 3);
        let dest = root.path().join("archive/2024-06-01/w-1");
        assert!(dest.join("w-1.log").exists());
        assert!(dest.join("w-1.pid").exists());
        assert!(!dest.join("w-10.log").exists());

        let metadata: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dest.join("metadata.json")).unwrap()).unwrap();
        assert_eq!(metadata["worker"]["worker_id"], "w-1");
        assert_eq!(metadata["files"].as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn test_missing_sources_still_write_metadata() {
        let root = TempDir::new().unwrap();
        let archiver = FsLogArchiver::new(
            root.path().join("nope"),
            root.path().join("nope"),
            root.path().join("archive"),
        );
        let worker = WorkerRecord::new("w-1", "t", "scan", "o", 10);

        let report = archiver.archive(&worker, Utc::now()).await.unwrap();

        assert_eq!(report.files_archived, 0);
        assert!(Path::new(&report.location).join("metadata.json").exists());
    }
}
