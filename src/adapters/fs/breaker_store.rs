//! `circuit_breakers.json` store.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::domain::errors::StoreError;
use crate::domain::models::CircuitBreakerState;
use crate::domain::ports::BreakerStore;
use super::json::{read_json, write_json_atomic};
use super::StateLayout;

#[derive(Debug, Clone)]
pub struct FsBreakerStore {
    path: PathBuf,
}

impl FsBreakerStore {
    pub fn new(layout: &StateLayout) -> Self {
        Self {
            path: layout.circuit_breakers(),
        }
    }
}

#[async_trait]
impl BreakerStore for FsBreakerStore {
    async fn load(&self) -> Result<BTreeMap<String, CircuitBreakerState>, StoreError> {
        Ok(read_json(&self.path).await?.unwrap_or_default())
    }

    async fn save(&self, breakers: &BTreeMap<String, CircuitBreakerState>) -> Result<(), StoreError> {
        write_json_atomic(&self.path, breakers).await
    }
}
