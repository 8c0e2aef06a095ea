//! The `KV(namespace, set)` contract consumed by `TokenRegistry` and the
//! `BanRegistry`/`KeyRing` read caches (§6, §4.3).

pub mod mem;
#[cfg(feature = "redis")]
pub mod redis_kv;

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("key not found")]
    NotFound,
    #[error("kv store error: {0}")]
    Other(String),
}

/// A TTL'd key-value store with an optional secondary index, matching §6's
/// `KV(namespace, set)` interface. `V` must round-trip through JSON; the
/// Redis implementation stores the JSON encoding as the value payload.
#[async_trait]
pub trait Kv<V: Serialize + DeserializeOwned + Send + Sync>: Send + Sync {
    /// Insert `value` under `key` with expiry `ttl`. If `index` is set,
    /// also record `key` under the secondary index bucket `index` so
    /// [`Kv::list_by_index`] can enumerate it (§4.3: "Query by `user_id`
    /// index for administrative listing of a user's live tokens").
    async fn put(
        &self,
        key: &str,
        value: &V,
        ttl: Duration,
        index: Option<&str>,
    ) -> Result<(), KvError>;

    async fn get(&self, key: &str) -> Result<V, KvError>;

    /// Idempotent: removing an already-absent key is not an error (§4.3).
    async fn remove(&self, key: &str) -> Result<(), KvError>;

    async fn list_by_index(&self, index: &str) -> Result<Vec<String>, KvError>;
}
