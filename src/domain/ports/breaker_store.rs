//! Circuit breaker persistence port.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::domain::errors::StoreError;
use crate::domain::models::CircuitBreakerState;

/// Durable storage for the breaker collection, keyed by worker type.
#[async_trait]
pub trait BreakerStore: Send + Sync {
    async fn load(&self) -> Result<BTreeMap<String, CircuitBreakerState>, StoreError>;

    async fn save(&self, breakers: &BTreeMap<String, CircuitBreakerState>) -> Result<(), StoreError>;
}
