//! Startup reconciliation.
//!
//! The termination pipeline can be interrupted between any two phases.
//! This pass re-derives the terminal state from whatever was persisted:
//! - an active record that also exists in the zombie store is a leftover
//!   from an interrupted relocation and is removed
//! - an active record already marked zombie is relocated
//! - a zombie worker still holding tokens has them returned

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::errors::StoreError;
use crate::domain::models::WorkerStatus;
use crate::domain::ports::WorkerStore;
use super::event_bus::EventBus;
use super::event_factory;
use super::token_ledger::TokenLedger;

/// What a reconciliation pass repaired.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub duplicates_removed: Vec<String>,
    pub relocations_completed: Vec<String>,
    pub allocations_released: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.duplicates_removed.is_empty()
            && self.relocations_completed.is_empty()
            && self.allocations_released.is_empty()
    }
}

pub struct Reconciler {
    ledger: Arc<TokenLedger>,
    workers: Arc<dyn WorkerStore>,
    event_bus: Arc<EventBus>,
}

impl Reconciler {
    pub const fn new(
        ledger: Arc<TokenLedger>,
        workers: Arc<dyn WorkerStore>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            ledger,
            workers,
            event_bus,
        }
    }

    /// Run one pass. Per-worker failures are logged and skipped; only a
    /// failure to list the stores aborts.
    pub async fn run(&self) -> Result<ReconcileReport, StoreError> {
        let mut report = ReconcileReport::default();

        for worker in self.workers.list_active().await? {
            let worker_id = worker.worker_id.as_str();
            let relocated = match self.workers.find_zombie(worker_id).await {
                Ok(found) => found.is_some(),
                Err(e) => {
                    warn!(worker_id, error = %e, "Failed to read zombie record");
                    continue;
                }
            };

            if relocated {
                match self.workers.remove_active(worker_id).await {
                    Ok(_) => report.duplicates_removed.push(worker_id.to_string()),
                    Err(e) => warn!(worker_id, error = %e, "Failed to remove duplicate record"),
                }
            } else if worker.status == WorkerStatus::Zombie {
                let (reason, at) = worker.cleanup.as_ref().map_or_else(
                    || ("reconciled".to_string(), Utc::now()),
                    |c| (c.reason.clone(), c.cleaned_at),
                );
                match self.workers.transition_to_zombie(worker_id, &reason, at).await {
                    Ok(_) => report.relocations_completed.push(worker_id.to_string()),
                    Err(e) => warn!(worker_id, error = %e, "Failed to complete relocation"),
                }
            }
        }

        // Allocations may have been made by another process since this
        // ledger last wrote.
        if let Err(e) = self.ledger.refresh().await {
            warn!(error = %e, "Ledger refresh failed, using last snapshot");
        }
        for zombie in self.workers.list_zombies().await? {
            let worker_id = zombie.worker_id.as_str();
            if !self
                .ledger
                .allocation(worker_id)
                .is_some_and(|a| a.status.is_held())
            {
                continue;
            }
            match self.ledger.release(worker_id, zombie.tokens_used()).await {
                Ok(_) => report.allocations_released.push(worker_id.to_string()),
                Err(e) => warn!(worker_id, error = %e, "Failed to release zombie allocation"),
            }
        }

        if report.is_clean() {
            info!("Reconciliation found nothing to repair");
        } else {
            warn!(
                duplicates = report.duplicates_removed.len(),
                relocations = report.relocations_completed.len(),
                released = report.allocations_released.len(),
                "Reconciliation repaired interrupted cleanups"
            );
        }
        self.event_bus
            .publish(event_factory::reconciled(
                serde_json::to_value(&report).unwrap_or_default(),
            ))
            .await;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryLedgerStore, InMemoryWorkerStore};
    use crate::domain::models::{AllocationStatus, WorkerRecord};
    use crate::domain::ports::LedgerStore;
    use crate::services::token_ledger::LedgerSettings;

    async fn setup() -> (Reconciler, Arc<TokenLedger>, Arc<InMemoryWorkerStore>) {
        setup_with_store(Arc::new(InMemoryLedgerStore::default())).await
    }

    async fn setup_with_store(
        store: Arc<InMemoryLedgerStore>,
    ) -> (Reconciler, Arc<TokenLedger>, Arc<InMemoryWorkerStore>) {
        let ledger = Arc::new(
            TokenLedger::open(
                LedgerSettings {
                    total_budget: 1000,
                    ..LedgerSettings::default()
                },
                store,
            )
            .await
            .unwrap(),
        );
        let workers = Arc::new(InMemoryWorkerStore::default());
        let reconciler = Reconciler::new(ledger.clone(), workers.clone(), Arc::new(EventBus::default()));
        (reconciler, ledger, workers)
    }

    fn worker(id: &str) -> WorkerRecord {
        WorkerRecord::new(id, "task-1", "scan", "coordinator", 200)
    }

    #[tokio::test]
    async fn test_clean_state_is_untouched() {
        let (reconciler, ledger, workers) = setup().await;
        ledger.allocate("w-1", 200).await.unwrap();
        workers.insert_active(&worker("w-1")).await.unwrap();

        let report = reconciler.run().await.unwrap();

        assert!(report.is_clean());
        assert!(workers.get_active("w-1").await.unwrap().is_some());
        assert_eq!(ledger.available(), 800);
    }

    #[tokio::test]
    async fn test_tokens_returned_but_not_transitioned() {
        let (reconciler, ledger, workers) = setup().await;
        ledger.allocate("w-1", 200).await.unwrap();
        let mut record = worker("w-1");
        record.mark_zombie("no heartbeat for 400s", Utc::now());
        workers.insert_active(&record).await.unwrap();
        ledger.release("w-1", 0).await.unwrap();

        let report = reconciler.run().await.unwrap();

        assert_eq!(report.relocations_completed, vec!["w-1".to_string()]);
        assert!(report.allocations_released.is_empty());
        assert!(workers.get_active("w-1").await.unwrap().is_none());
        assert_eq!(
            workers.find_zombie("w-1").await.unwrap().and_then(|w| w.cleanup).map(|c| c.reason),
            Some("no heartbeat for 400s".to_string())
        );
    }

    #[tokio::test]
    async fn test_duplicate_active_record_removed() {
        let (reconciler, _, workers) = setup().await;
        workers.insert_active(&worker("w-1")).await.unwrap();
        workers
            .transition_to_zombie("w-1", "stale", Utc::now())
            .await
            .unwrap();
        workers.insert_active(&worker("w-1")).await.unwrap();

        let report = reconciler.run().await.unwrap();

        assert_eq!(report.duplicates_removed, vec!["w-1".to_string()]);
        assert!(workers.get_active("w-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zombie_holding_tokens_is_released() {
        let (reconciler, ledger, workers) = setup().await;
        ledger.allocate("w-1", 200).await.unwrap();
        ledger.start_using("w-1").await.unwrap();
        workers.insert_active(&worker("w-1")).await.unwrap();
        workers
            .transition_to_zombie("w-1", "stale", Utc::now())
            .await
            .unwrap();

        let report = reconciler.run().await.unwrap();

        assert_eq!(report.allocations_released, vec!["w-1".to_string()]);
        assert_eq!(
            ledger.allocation("w-1").map(|a| a.status),
            Some(AllocationStatus::Released)
        );
        assert_eq!(ledger.available(), 1000);

        assert!(reconciler.run().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_allocation_written_elsewhere_is_released() {
        let store = Arc::new(InMemoryLedgerStore::default());
        let (reconciler, ledger, workers) = setup_with_store(store.clone()).await;

        let mut external = store.load().await.unwrap().unwrap();
        external.allocate("w-1", 200, Utc::now()).unwrap();
        external.start_using("w-1", Utc::now()).unwrap();
        store.save(&external).await.unwrap();
        workers.insert_active(&worker("w-1")).await.unwrap();
        workers
            .transition_to_zombie("w-1", "stale", Utc::now())
            .await
            .unwrap();
        assert!(ledger.allocation("w-1").is_none());

        let report = reconciler.run().await.unwrap();

        assert_eq!(report.allocations_released, vec!["w-1".to_string()]);
        let persisted = store.load().await.unwrap().unwrap();
        assert_eq!(persisted.allocations["w-1"].status, AllocationStatus::Released);
        assert_eq!(persisted.available, 1000);
    }
}
