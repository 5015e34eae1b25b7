//! The authoritative image order of each session.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::config::OrderStoreConfig;
use crate::error::{Result, SessionError};
use crate::registry::SessionId;

/// Ordered list of image keys per session.
///
/// Every mutation is applied as a whole or not at all.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Appends `keys` after the existing entries, in the given order.
    async fn append(&self, session: &SessionId, keys: &[String]) -> Result<()>;

    /// Removes `key`; `NotFound` if it is not in the order.
    async fn remove(&self, session: &SessionId, key: &str) -> Result<()>;

    /// Replaces the order with `keys`, which must be a permutation of it.
    async fn reorder(&self, session: &SessionId, keys: &[String]) -> Result<()>;

    /// Current order.
    async fn list(&self, session: &SessionId) -> Result<Vec<String>>;

    /// Drops the whole order.
    async fn clear(&self, session: &SessionId) -> Result<()>;
}

/// Checks that `candidate` holds exactly the keys of `current`.
///
/// # Errors
///
/// Returns `SessionError::InvalidOrder` listing the missing, unexpected and
/// duplicated keys.
pub fn validate_permutation(current: &[String], candidate: &[String]) -> Result<()> {
    let known: HashSet<&str> = current.iter().map(String::as_str).collect();

    let mut seen = HashSet::new();
    let mut duplicated = Vec::new();
    let mut unexpected = Vec::new();
    for key in candidate {
        if !seen.insert(key.as_str()) {
            if !duplicated.contains(key) {
                duplicated.push(key.clone());
            }
        } else if !known.contains(key.as_str()) {
            unexpected.push(key.clone());
        }
    }

    let missing: Vec<String> = current
        .iter()
        .filter(|key| !seen.contains(key.as_str()))
        .cloned()
        .collect();

    if missing.is_empty() && unexpected.is_empty() && duplicated.is_empty() {
        Ok(())
    } else {
        Err(SessionError::InvalidOrder {
            missing,
            unexpected,
            duplicated,
        })
    }
}

/// Process-local order store.
#[derive(Debug, Default)]
pub struct MemoryOrderStore {
    orders: RwLock<HashMap<SessionId, Vec<String>>>,
}

impl MemoryOrderStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn append(&self, session: &SessionId, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.orders
            .write()
            .await
            .entry(session.clone())
            .or_default()
            .extend_from_slice(keys);
        Ok(())
    }

    async fn remove(&self, session: &SessionId, key: &str) -> Result<()> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(session)
            .ok_or_else(|| SessionError::not_found(key))?;
        let pos = order
            .iter()
            .position(|k| k == key)
            .ok_or_else(|| SessionError::not_found(key))?;
        order.remove(pos);
        Ok(())
    }

    async fn reorder(&self, session: &SessionId, keys: &[String]) -> Result<()> {
        let mut orders = self.orders.write().await;
        let current = orders.get(session).map(Vec::as_slice).unwrap_or_default();
        validate_permutation(current, keys)?;
        orders.insert(session.clone(), keys.to_vec());
        Ok(())
    }

    async fn list(&self, session: &SessionId) -> Result<Vec<String>> {
        Ok(self
            .orders
            .read()
            .await
            .get(session)
            .cloned()
            .unwrap_or_default())
    }

    async fn clear(&self, session: &SessionId) -> Result<()> {
        self.orders.write().await.remove(session);
        Ok(())
    }
}

/// Builds the order store selected by the configuration.
pub async fn connect(config: &OrderStoreConfig) -> Result<Arc<dyn OrderStore>> {
    match config {
        OrderStoreConfig::Memory => Ok(Arc::new(MemoryOrderStore::new())),
        #[cfg(feature = "redis")]
        OrderStoreConfig::Redis { url, prefix } => Ok(Arc::new(
            crate::redis_store::RedisOrderStore::new(url, prefix).await?,
        )),
        #[cfg(not(feature = "redis"))]
        OrderStoreConfig::Redis { .. } => Err(SessionError::config_validation(
            "orderStore.backend 'redis' is not available in this build",
            "Rebuild with `--features redis` or use the memory backend",
        )),
    }
}
