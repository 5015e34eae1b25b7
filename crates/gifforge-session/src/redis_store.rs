//! Redis-backed order store.
//!
//! Each session's order is one Redis list at `<prefix>session:<id>:order`.

use async_trait::async_trait;
use redis::{AsyncCommands, Client};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, SessionError};
use crate::order::{validate_permutation, OrderStore};
use crate::registry::SessionId;

/// Order store keeping one Redis list per session.
pub struct RedisOrderStore {
    conn: Mutex<redis::aio::MultiplexedConnection>,
    prefix: String,
}

impl std::fmt::Debug for RedisOrderStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisOrderStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

fn storage_err(action: &str, err: &redis::RedisError) -> SessionError {
    SessionError::storage(format!("redis {action} failed: {err}"))
}

impl RedisOrderStore {
    /// Connects to `url` and checks the server answers.
    pub async fn new(url: &str, prefix: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| {
            SessionError::config_validation(
                format!("invalid redis url '{url}': {e}"),
                "Use a URL such as redis://127.0.0.1:6379",
            )
        })?;

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| storage_err("connect", &e))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| storage_err("ping", &e))?;

        debug!(prefix = %prefix, "Connected to redis order store");
        Ok(Self {
            conn: Mutex::new(conn),
            prefix: prefix.to_string(),
        })
    }

    fn order_key(&self, session: &SessionId) -> String {
        format!("{}session:{}:order", self.prefix, session)
    }
}

#[async_trait]
impl OrderStore for RedisOrderStore {
    async fn append(&self, session: &SessionId, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().await;
        let _: () = conn
            .rpush(self.order_key(session), keys)
            .await
            .map_err(|e| storage_err("RPUSH", &e))?;
        Ok(())
    }

    async fn remove(&self, session: &SessionId, key: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let removed: i64 = conn
            .lrem(self.order_key(session), 1, key)
            .await
            .map_err(|e| storage_err("LREM", &e))?;
        if removed == 0 {
            return Err(SessionError::not_found(key));
        }
        Ok(())
    }

    async fn reorder(&self, session: &SessionId, keys: &[String]) -> Result<()> {
        let order_key = self.order_key(session);
        let mut conn = self.conn.lock().await;

        let current: Vec<String> = conn
            .lrange(&order_key, 0, -1)
            .await
            .map_err(|e| storage_err("LRANGE", &e))?;
        validate_permutation(&current, keys)?;
        if keys.is_empty() {
            return Ok(());
        }

        // MULTI/EXEC: readers see the old list or the new one, never a mix.
        let _: () = redis::pipe()
            .atomic()
            .del(&order_key)
            .ignore()
            .rpush(&order_key, keys)
            .ignore()
            .query_async(&mut *conn)
            .await
            .map_err(|e| storage_err("reorder transaction", &e))?;
        Ok(())
    }

    async fn list(&self, session: &SessionId) -> Result<Vec<String>> {
        let mut conn = self.conn.lock().await;
        conn.lrange(self.order_key(session), 0, -1)
            .await
            .map_err(|e| storage_err("LRANGE", &e))
    }

    async fn clear(&self, session: &SessionId) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let _: () = conn
            .del(self.order_key(session))
            .await
            .map_err(|e| storage_err("DEL", &e))?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Requires a local server; run with `GIFFORGE_TEST_REDIS=redis://127.0.0.1:6379`.
    async fn store() -> Option<RedisOrderStore> {
        let url = std::env::var("GIFFORGE_TEST_REDIS").ok()?;
        let prefix = format!("gifforge-test-{}:", uuid::Uuid::new_v4().simple());
        Some(RedisOrderStore::new(&url, &prefix).await.unwrap())
    }

    fn keys(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn test_redis_roundtrip() {
        let Some(store) = store().await else {
            return;
        };
        let id = SessionId::parse("s1").unwrap();

        store.append(&id, &keys(&["a", "b", "c"])).await.unwrap();
        store.reorder(&id, &keys(&["c", "a", "b"])).await.unwrap();
        assert_eq!(store.list(&id).await.unwrap(), keys(&["c", "a", "b"]));

        assert!(matches!(
            store.reorder(&id, &keys(&["c", "a"])).await,
            Err(SessionError::InvalidOrder { .. })
        ));
        assert_eq!(store.list(&id).await.unwrap(), keys(&["c", "a", "b"]));

        store.remove(&id, "a").await.unwrap();
        assert!(matches!(
            store.remove(&id, "a").await,
            Err(SessionError::NotFound { .. })
        ));

        store.clear(&id).await.unwrap();
        assert!(store.list(&id).await.unwrap().is_empty());
    }
}
