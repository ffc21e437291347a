//! Push-based heartbeat leases.
//!
//! Workers (or whoever relays their pulses) renew a lease; the registry
//! answers with the last renewal time and lists leases that lapsed. The
//! threshold semantics match polling a timestamp: a lease is expired once
//! `now - last_renewal >= ttl`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::errors::StoreError;
use crate::domain::ports::HeartbeatRegistry;

#[derive(Debug, Default)]
pub struct LeaseRegistry {
    leases: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl LeaseRegistry {
    pub async fn renew(&self, worker_id: &str) {
        self.renew_at(worker_id, Utc::now()).await;
    }

    pub async fn renew_at(&self, worker_id: &str, at: DateTime<Utc>) {
        let mut leases = self.leases.write().await;
        let lease = leases.entry(worker_id.to_string()).or_insert(at);
        // Out-of-order pulses never move a lease backwards.
        if at > *lease {
            *lease = at;
        }
    }

    /// Workers whose lease lapsed, ordered by id.
    pub async fn expired(&self, ttl: Duration, now: DateTime<Utc>) -> Vec<String> {
        let leases = self.leases.read().await;
        let mut expired: Vec<String> = leases
            .iter()
            .filter(|(_, renewed)| now - **renewed >= ttl)
            .map(|(id, _)| id.clone())
            .collect();
        expired.sort();
        expired
    }
}

#[async_trait]
impl HeartbeatRegistry for LeaseRegistry {
    async fn record(&self, worker_id: &str) -> Result<(), StoreError> {
        self.renew(worker_id).await;
        Ok(())
    }

    async fn last_heartbeat(&self, worker_id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.leases.read().await.get(worker_id).copied())
    }

    async fn forget(&self, worker_id: &str) -> Result<(), StoreError> {
        self.leases.write().await.remove(worker_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_expiry_uses_inclusive_threshold() {
        let registry = LeaseRegistry::default();
        let now = Utc::now();
        registry.renew_at("w-1", now - Duration::seconds(300)).await;
        registry.renew_at("w-2", now - Duration::seconds(299)).await;

        assert_eq!(
            registry.expired(Duration::seconds(300), now).await,
            vec!["w-1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_stale_renewal_is_ignored() {
        let registry = LeaseRegistry::default();
        let now = Utc::now();
        registry.renew_at("w-1", now).await;
        registry.renew_at("w-1", now - Duration::seconds(60)).await;

        assert_eq!(registry.last_heartbeat("w-1").await.unwrap(), Some(now));
    }

    #[tokio::test]
    async fn test_forget_drops_lease() {
        let registry = LeaseRegistry::default();
        registry.record("w-1").await.unwrap();
        registry.forget("w-1").await.unwrap();
        assert!(registry.last_heartbeat("w-1").await.unwrap().is_none());
    }
}
