//! In-memory implementations of the store ports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use crate::domain::errors::StoreError;
use crate::domain::models::{
    CircuitBreakerState, LedgerRecord, LifecycleEvent, RestartQueueEntry, WorkerRecord,
};
use crate::domain::ports::{BreakerStore, EventStore, LedgerStore, RestartQueue, WorkerStore};

/// Ledger held in memory. Saves can be made to fail for testing.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    record: RwLock<Option<LedgerRecord>>,
    fail_saves: AtomicBool,
}

impl InMemoryLedgerStore {
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn load(&self) -> Result<Option<LedgerRecord>, StoreError> {
        Ok(self.record.read().await.clone())
    }

    async fn save(&self, record: &LedgerRecord) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Io("ledger store unavailable".to_string()));
        }
        *self.record.write().await = Some(record.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct WorkerCollections {
    active: BTreeMap<String, WorkerRecord>,
    zombie: BTreeMap<String, WorkerRecord>,
}

/// Active and zombie collections behind one lock, so relocation is atomic.
#[derive(Debug, Default)]
pub struct InMemoryWorkerStore {
    inner: RwLock<WorkerCollections>,
}

#[async_trait]
impl WorkerStore for InMemoryWorkerStore {
    async fn insert_active(&self, record: &WorkerRecord) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .active
            .insert(record.worker_id.clone(), record.clone());
        Ok(())
    }

    async fn update_active(&self, record: &WorkerRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let slot = inner
            .active
            .get_mut(&record.worker_id)
            .ok_or_else(|| StoreError::NotFound(record.worker_id.clone()))?;
        *slot = record.clone();
        Ok(())
    }

    async fn get_active(&self, worker_id: &str) -> Result<Option<WorkerRecord>, StoreError> {
        Ok(self.inner.read().await.active.get(worker_id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<WorkerRecord>, StoreError> {
        Ok(self.inner.read().await.active.values().cloned().collect())
    }

    async fn remove_active(&self, worker_id: &str) -> Result<bool, StoreError> {
        Ok(self.inner.write().await.active.remove(worker_id).is_some())
    }

    async fn find_zombie(&self, worker_id: &str) -> Result<Option<WorkerRecord>, StoreError> {
        Ok(self.inner.read().await.zombie.get(worker_id).cloned())
    }

    async fn list_zombies(&self) -> Result<Vec<WorkerRecord>, StoreError> {
        Ok(self.inner.read().await.zombie.values().cloned().collect())
    }

    async fn transition_to_zombie(
        &self,
        worker_id: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<WorkerRecord, StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.zombie.get(worker_id).cloned() {
            inner.active.remove(worker_id);
            return Ok(existing);
        }

        let mut record = inner
            .active
            .remove(worker_id)
            .ok_or_else(|| StoreError::NotFound(worker_id.to_string()))?;
        record.mark_zombie(reason, at);
        inner.zombie.insert(worker_id.to_string(), record.clone());
        Ok(record)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBreakerStore {
    breakers: RwLock<BTreeMap<String, CircuitBreakerState>>,
}

#[async_trait]
impl BreakerStore for InMemoryBreakerStore {
    async fn load(&self) -> Result<BTreeMap<String, CircuitBreakerState>, StoreError> {
        Ok(self.breakers.read().await.clone())
    }

    async fn save(&self, breakers: &BTreeMap<String, CircuitBreakerState>) -> Result<(), StoreError> {
        *self.breakers.write().await = breakers.clone();
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRestartQueue {
    entries: RwLock<BTreeMap<String, RestartQueueEntry>>,
}

#[async_trait]
impl RestartQueue for InMemoryRestartQueue {
    async fn enqueue(&self, entry: &RestartQueueEntry) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .insert(entry.new_worker_id.clone(), entry.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RestartQueueEntry>, StoreError> {
        let mut entries: Vec<_> = self.entries.read().await.values().cloned().collect();
        entries.sort_by_key(|e| e.scheduled_at);
        Ok(entries)
    }

    async fn remove(&self, new_worker_id: &str) -> Result<bool, StoreError> {
        Ok(self.entries.write().await.remove(new_worker_id).is_some())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: RwLock<Vec<LifecycleEvent>>,
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: &LifecycleEvent) -> Result<(), StoreError> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<LifecycleEvent>, StoreError> {
        let events = self.events.read().await;
        let skip = events.len().saturating_sub(limit);
        Ok(events[skip..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::WorkerStatus;

    #[tokio::test]
    async fn test_transition_is_idempotent() {
        let store = InMemoryWorkerStore::default();
        store
            .insert_active(&WorkerRecord::new("w-1", "t", "scan", "o", 10))
            .await
            .unwrap();

        let first_at = Utc::now();
        let first = store.transition_to_zombie("w-1", "stale", first_at).await.unwrap();
        let second = store
            .transition_to_zombie("w-1", "other", Utc::now())
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.status, WorkerStatus::Zombie);
        assert_eq!(first.cleanup.map(|c| c.cleaned_at), Some(first_at));
        assert!(store.list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transition_unknown_worker() {
        let store = InMemoryWorkerStore::default();
        assert!(matches!(
            store.transition_to_zombie("ghost", "stale", Utc::now()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_recent_events_are_oldest_first() {
        let store = InMemoryEventStore::default();
        for sequence in 0..5 {
            let mut event = LifecycleEvent::new(
                crate::domain::models::LifecycleEventType::ZombieDetected,
                None,
                serde_json::Value::Null,
            );
            event.sequence = sequence;
            store.append(&event).await.unwrap();
        }
        let recent: Vec<u64> = store
            .recent(2)
            .await
            .unwrap()
            .iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(recent, vec![3, 4]);
    }
}
