use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Worker status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Pending,
    Active,
    Busy,
    Zombie,
    Restarted,
    Failed,
    Completed,
}

impl WorkerStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Busy => "busy",
            Self::Zombie => "zombie",
            Self::Restarted => "restarted",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }

    /// Statuses eligible for zombie classification.
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Pending | Self::Active | Self::Busy)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "busy" => Ok(Self::Busy),
            "zombie" => Ok(Self::Zombie),
            "restarted" => Ok(Self::Restarted),
            "failed" => Ok(Self::Failed),
            "completed" => Ok(Self::Completed),
            _ => Err(anyhow::anyhow!("Invalid worker status: {s}")),
        }
    }
}

/// Resources granted to a worker at admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerResources {
    pub token_allocation: u64,

    /// Tokens reported as consumed, when the worker reports usage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
}

/// Restart lineage bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartInfo {
    #[serde(default)]
    pub restart_attempt: u32,
}

/// Cleanup metadata, written once on the first transition to zombie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupInfo {
    pub cleaned_at: DateTime<Utc>,
    pub reason: String,
    pub automated: bool,
}

/// Persisted worker record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub worker_id: String,
    pub task_id: String,
    pub worker_type: String,
    /// Entity that spawned the worker.
    pub owner: String,
    pub status: WorkerStatus,
    pub created_at: DateTime<Utc>,
    pub resources: WorkerResources,
    #[serde(default)]
    pub restart: RestartInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<CleanupInfo>,
}

impl WorkerRecord {
    /// Create a pending worker holding `token_allocation` tokens.
    pub fn new(
        worker_id: impl Into<String>,
        task_id: impl Into<String>,
        worker_type: impl Into<String>,
        owner: impl Into<String>,
        token_allocation: u64,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            task_id: task_id.into(),
            worker_type: worker_type.into(),
            owner: owner.into(),
            status: WorkerStatus::Pending,
            created_at: Utc::now(),
            resources: WorkerResources {
                token_allocation,
                tokens_used: None,
            },
            restart: RestartInfo::default(),
            cleanup: None,
        }
    }

    pub const fn with_restart_attempt(mut self, attempt: u32) -> Self {
        self.restart.restart_attempt = attempt;
        self
    }

    pub fn tokens_used(&self) -> u64 {
        self.resources.tokens_used.unwrap_or(0)
    }

    /// Mark the record as a zombie. Cleanup metadata is only set once.
    pub fn mark_zombie(&mut self, reason: impl Into<String>, at: DateTime<Utc>) {
        self.status = WorkerStatus::Zombie;
        if self.cleanup.is_none() {
            self.cleanup = Some(CleanupInfo {
                cleaned_at: at,
                reason: reason.into(),
                automated: true,
            });
        }
    }

    /// Identifier of the first worker in this restart lineage.
    ///
    /// A replacement spawned on attempt `n` carries an `-r<n>` suffix, which
    /// is stripped so repeated restarts don't accumulate suffixes. Original
    /// workers (attempt 0) keep their id as is, even when it happens to end
    /// in `-r<digits>`.
    pub fn lineage_id(&self) -> &str {
        let attempt = self.restart.restart_attempt;
        if attempt == 0 {
            return &self.worker_id;
        }
        self.worker_id
            .strip_suffix(format!("-r{attempt}").as_str())
            .filter(|base| !base.is_empty())
            .unwrap_or(self.worker_id.as_str())
    }

    /// Identifier for the replacement spawned on `attempt`.
    pub fn restart_worker_id(&self, attempt: u32) -> String {
        format!("{}-r{attempt}", self.lineage_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn worker(id: &str) -> WorkerRecord {
        WorkerRecord::new(id, "task-1", "scan", "coordinator", 500)
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            WorkerStatus::Pending,
            WorkerStatus::Busy,
            WorkerStatus::Zombie,
            WorkerStatus::Completed,
        ] {
            assert_eq!(status.as_str().parse::<WorkerStatus>().unwrap(), status);
        }
        assert!("sleeping".parse::<WorkerStatus>().is_err());
    }

    #[test]
    fn test_live_statuses() {
        assert!(WorkerStatus::Pending.is_live());
        assert!(WorkerStatus::Active.is_live());
        assert!(WorkerStatus::Busy.is_live());
        assert!(!WorkerStatus::Zombie.is_live());
        assert!(!WorkerStatus::Completed.is_live());
    }

    #[test]
    fn test_mark_zombie_sets_cleanup_once() {
        let mut record = worker("w1");
        let first = Utc::now();
        record.mark_zombie("heartbeat timeout", first);
        record.mark_zombie("second pass", first + Duration::seconds(30));

        let cleanup = record.cleanup.unwrap();
        assert_eq!(record.status, WorkerStatus::Zombie);
        assert_eq!(cleanup.cleaned_at, first);
        assert_eq!(cleanup.reason, "heartbeat timeout");
        assert!(cleanup.automated);
    }

    #[test]
    fn test_restart_ids_do_not_accumulate_suffixes() {
        let original = worker("scan-worker-01");
        assert_eq!(original.restart_worker_id(1), "scan-worker-01-r1");

        let restarted = worker("scan-worker-01-r1").with_restart_attempt(1);
        assert_eq!(restarted.lineage_id(), "scan-worker-01");
        assert_eq!(restarted.restart_worker_id(2), "scan-worker-01-r2");

        let odd = worker("-r3").with_restart_attempt(3);
        assert_eq!(odd.lineage_id(), "-r3");
    }

    #[test]
    fn test_original_ids_ending_in_r_digits_keep_their_lineage() {
        let build_r2 = worker("build-r2");
        assert_eq!(build_r2.lineage_id(), "build-r2");
        assert_eq!(build_r2.restart_worker_id(1), "build-r2-r1");

        let build_restarted = worker("build-r2").with_restart_attempt(2);
        assert_eq!(build_restarted.lineage_id(), "build");
        assert_eq!(build_restarted.restart_worker_id(3), "build-r3");

        // Suffix that doesn't match the recorded attempt is part of the id.
        let mismatched = worker("build-r7").with_restart_attempt(1);
        assert_eq!(mismatched.lineage_id(), "build-r7");
        assert_eq!(mismatched.restart_worker_id(2), "build-r7-r2");
    }

    #[test]
    fn test_persisted_shape() {
        let mut record = worker("w1");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"], "pending");
        assert_eq!(value["resources"]["token_allocation"], 500);
        assert_eq!(value["restart"]["restart_attempt"], 0);
        assert!(value.get("cleanup").is_none());

        record.mark_zombie("heartbeat timeout", Utc::now());
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["cleanup"]["automated"], true);
    }
}
