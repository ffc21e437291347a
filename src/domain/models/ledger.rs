//! Token budget ledger record.
//!
//! The record is a plain value: every mutation is a method that either
//! succeeds completely or leaves the record untouched. Serialization and
//! locking are handled by [`crate::services::TokenLedger`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::errors::LedgerError;

/// Maximum number of batch entries retained in `reclamation_log`.
pub const MAX_RECLAMATION_LOG: usize = 100;

/// Lifecycle of a single allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    Allocated,
    InUse,
    Released,
    Reclaimed,
}

impl AllocationStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Allocated => "allocated",
            Self::InUse => "in_use",
            Self::Released => "released",
            Self::Reclaimed => "reclaimed",
        }
    }

    /// Whether tokens are still held against the budget.
    pub const fn is_held(&self) -> bool {
        matches!(self, Self::Allocated | Self::InUse)
    }
}

impl fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tokens held by one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub tokens: u64,
    pub status: AllocationStatus,
    pub allocated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_used: Option<u64>,
}

/// One aggregate entry per `reclaim_stale` batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclamationEntry {
    pub timestamp: DateTime<Utc>,
    pub tokens_reclaimed: u64,
    pub workers_cleaned: Vec<String>,
}

/// Outcome of a `release` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Tokens were returned to `available`.
    Released { tokens: u64 },
    /// The allocation had already been released; nothing changed.
    AlreadyReleased,
    /// The allocation was force-reclaimed earlier; nothing changed.
    AlreadyReclaimed,
    /// Every held token was consumed, so nothing was returned.
    FullyUsed,
}

impl ReleaseOutcome {
    pub const fn tokens_returned(&self) -> u64 {
        match self {
            Self::Released { tokens } => *tokens,
            Self::AlreadyReleased | Self::AlreadyReclaimed | Self::FullyUsed => 0,
        }
    }
}

/// Result of a stale-allocation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    pub tokens_reclaimed: u64,
    pub workers_cleaned: Vec<String>,
}

/// Read-only view of the budget counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub total_budget: u64,
    pub allocated: u64,
    pub in_use: u64,
    pub available: u64,
    pub held_allocations: usize,
    pub total_allocations: usize,
    pub total_actual_used: u64,
    pub updated_at: DateTime<Utc>,
}

/// Persisted budget ledger.
///
/// Invariant: `allocated + in_use + available == total_budget`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub total_budget: u64,
    pub allocated: u64,
    pub in_use: u64,
    pub available: u64,
    #[serde(default)]
    pub allocations: BTreeMap<String, Allocation>,
    #[serde(default)]
    pub reclamation_log: Vec<ReclamationEntry>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerRecord {
    /// Create an empty ledger with the whole budget available.
    pub fn new(total_budget: u64) -> Self {
        Self {
            total_budget,
            allocated: 0,
            in_use: 0,
            available: total_budget,
            allocations: BTreeMap::new(),
            reclamation_log: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Check the conservation invariant.
    pub fn is_balanced(&self) -> bool {
        self.allocated
            .checked_add(self.in_use)
            .and_then(|sum| sum.checked_add(self.available))
            == Some(self.total_budget)
    }

    /// Reject a record whose counters do not balance or cannot cover the
    /// allocations held against them.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if !self.is_balanced() {
            return Err(LedgerError::Inconsistent(format!(
                "allocated {} + in_use {} + available {} != total_budget {}",
                self.allocated, self.in_use, self.available, self.total_budget
            )));
        }

        let mut held_allocated: u64 = 0;
        let mut held_in_use: u64 = 0;
        for (worker_id, allocation) in &self.allocations {
            let column = match allocation.status {
                AllocationStatus::Allocated => &mut held_allocated,
                AllocationStatus::InUse => &mut held_in_use,
                AllocationStatus::Released | AllocationStatus::Reclaimed => continue,
            };
            *column = column.checked_add(allocation.tokens).ok_or_else(|| {
                LedgerError::Inconsistent(format!("allocation for {worker_id} overflows"))
            })?;
        }
        if held_allocated > self.allocated {
            return Err(LedgerError::Inconsistent(format!(
                "held allocations total {held_allocated} but allocated is {}",
                self.allocated
            )));
        }
        if held_in_use > self.in_use {
            return Err(LedgerError::Inconsistent(format!(
                "in-use allocations total {held_in_use} but in_use is {}",
                self.in_use
            )));
        }
        Ok(())
    }

    /// Move `tokens` from `available` to `allocated` for a new worker.
    pub fn allocate(
        &mut self,
        worker_id: &str,
        tokens: u64,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if self
            .allocations
            .get(worker_id)
            .is_some_and(|a| a.status.is_held())
        {
            return Err(LedgerError::DuplicateAllocation(worker_id.to_string()));
        }
        if tokens > self.available {
            return Err(LedgerError::InsufficientBudget {
                requested: tokens,
                available: self.available,
            });
        }

        self.available -= tokens;
        self.allocated += tokens;
        self.allocations.insert(
            worker_id.to_string(),
            Allocation {
                tokens,
                status: AllocationStatus::Allocated,
                allocated_at: now,
                started_at: None,
                released_at: None,
                actual_used: None,
            },
        );
        Ok(())
    }

    /// Move a worker's full allocation from `allocated` to `in_use`.
    pub fn start_using(&mut self, worker_id: &str, now: DateTime<Utc>) -> Result<u64, LedgerError> {
        let allocation = self
            .allocations
            .get_mut(worker_id)
            .ok_or_else(|| LedgerError::AllocationNotFound(worker_id.to_string()))?;

        if allocation.status != AllocationStatus::Allocated {
            return Err(LedgerError::InvalidAllocationState {
                worker_id: worker_id.to_string(),
                status: allocation.status,
                expected: AllocationStatus::Allocated,
            });
        }

        let tokens = allocation.tokens;
        let allocated = take(self.allocated, tokens, "allocated")?;
        let in_use = give(self.in_use, tokens, "in_use")?;

        allocation.status = AllocationStatus::InUse;
        allocation.started_at = Some(now);
        self.allocated = allocated;
        self.in_use = in_use;
        Ok(tokens)
    }

    /// Refund the full held amount; `actual_used` is recorded as metadata.
    pub fn release(
        &mut self,
        worker_id: &str,
        actual_used: u64,
        now: DateTime<Utc>,
    ) -> Result<ReleaseOutcome, LedgerError> {
        let allocation = self
            .allocations
            .get_mut(worker_id)
            .ok_or_else(|| LedgerError::AllocationNotFound(worker_id.to_string()))?;

        let tokens = allocation.tokens;
        let (allocated, in_use) = match allocation.status {
            AllocationStatus::Released => return Ok(ReleaseOutcome::AlreadyReleased),
            AllocationStatus::Reclaimed => return Ok(ReleaseOutcome::AlreadyReclaimed),
            AllocationStatus::Allocated => (take(self.allocated, tokens, "allocated")?, self.in_use),
            AllocationStatus::InUse => (self.allocated, take(self.in_use, tokens, "in_use")?),
        };
        let available = give(self.available, tokens, "available")?;

        allocation.status = AllocationStatus::Released;
        allocation.released_at = Some(now);
        allocation.actual_used = Some(actual_used);
        self.allocated = allocated;
        self.in_use = in_use;
        self.available = available;
        Ok(ReleaseOutcome::Released { tokens })
    }

    /// Release only if some of the held tokens went unused.
    ///
    /// A held allocation whose `actual_used` covers every token is left as
    /// is and reported as [`ReleaseOutcome::FullyUsed`].
    pub fn release_unused(
        &mut self,
        worker_id: &str,
        actual_used: u64,
        now: DateTime<Utc>,
    ) -> Result<ReleaseOutcome, LedgerError> {
        let allocation = self
            .allocations
            .get(worker_id)
            .ok_or_else(|| LedgerError::AllocationNotFound(worker_id.to_string()))?;
        if allocation.status.is_held() && actual_used >= allocation.tokens {
            return Ok(ReleaseOutcome::FullyUsed);
        }
        self.release(worker_id, actual_used, now)
    }

    /// Force-return every held allocation older than `timeout`.
    ///
    /// Appends a single log entry for the whole batch when anything was
    /// reclaimed.
    pub fn reclaim_stale(
        &mut self,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<ReclaimReport, LedgerError> {
        let stale: Vec<(String, AllocationStatus, u64)> = self
            .allocations
            .iter()
            .filter(|(_, a)| a.status.is_held() && now - a.allocated_at >= timeout)
            .map(|(id, a)| (id.clone(), a.status, a.tokens))
            .collect();

        let (mut allocated, mut in_use, mut available) = (self.allocated, self.in_use, self.available);
        let mut report = ReclaimReport::default();
        for (worker_id, status, tokens) in &stale {
            match status {
                AllocationStatus::Allocated => allocated = take(allocated, *tokens, "allocated")?,
                AllocationStatus::InUse => in_use = take(in_use, *tokens, "in_use")?,
                AllocationStatus::Released | AllocationStatus::Reclaimed => continue,
            }
            available = give(available, *tokens, "available")?;
            report.tokens_reclaimed = give(report.tokens_reclaimed, *tokens, "tokens_reclaimed")?;
            report.workers_cleaned.push(worker_id.clone());
        }

        if report.workers_cleaned.is_empty() {
            return Ok(report);
        }

        for worker_id in &report.workers_cleaned {
            if let Some(allocation) = self.allocations.get_mut(worker_id) {
                allocation.status = AllocationStatus::Reclaimed;
                allocation.released_at = Some(now);
            }
        }
        self.allocated = allocated;
        self.in_use = in_use;
        self.available = available;

        self.reclamation_log.push(ReclamationEntry {
            timestamp: now,
            tokens_reclaimed: report.tokens_reclaimed,
            workers_cleaned: report.workers_cleaned.clone(),
        });
        if self.reclamation_log.len() > MAX_RECLAMATION_LOG {
            let excess = self.reclamation_log.len() - MAX_RECLAMATION_LOG;
            self.reclamation_log.drain(..excess);
        }

        Ok(report)
    }

    /// Drop released allocations. Budget counters are never touched.
    pub fn compact(&mut self) -> usize {
        let before = self.allocations.len();
        self.allocations
            .retain(|_, a| a.status != AllocationStatus::Released);
        before - self.allocations.len()
    }

    pub fn summary(&self) -> LedgerSummary {
        LedgerSummary {
            total_budget: self.total_budget,
            allocated: self.allocated,
            in_use: self.in_use,
            available: self.available,
            held_allocations: self
                .allocations
                .values()
                .filter(|a| a.status.is_held())
                .count(),
            total_allocations: self.allocations.len(),
            total_actual_used: self.allocations.values().filter_map(|a| a.actual_used).sum(),
            updated_at: self.updated_at,
        }
    }
}

fn take(column: u64, tokens: u64, name: &str) -> Result<u64, LedgerError> {
    column
        .checked_sub(tokens)
        .ok_or_else(|| LedgerError::Inconsistent(format!("{name} {column} cannot cover {tokens} tokens")))
}

fn give(column: u64, tokens: u64, name: &str) -> Result<u64, LedgerError> {
    column
        .checked_add(tokens)
        .ok_or_else(|| LedgerError::Inconsistent(format!("{name} overflows adding {tokens} tokens")))
}
