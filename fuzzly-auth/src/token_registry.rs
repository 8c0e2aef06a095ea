//! C4: `TokenRegistry` — the KV-backed source of truth for token revocation
//! (§4.3). A missing record means "revoked or expired"; the registry is
//! never the sole store of token-derived rights.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fuzzly_kv::{Kv, KvError};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use fuzzly_api_core::error::AuthError;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TokenState {
    Active,
    Inactive,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub guid: Uuid,
    pub state: TokenState,
    pub user_id: i64,
    pub key_id: i64,
    pub algorithm: i16,
    pub version: String,
    pub issued: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    /// Opaque digest of selected request headers, copied from the token's
    /// `fp` claim at issuance time; empty when the caller supplied none.
    pub fingerprint: Vec<u8>,
}

pub struct TokenRegistry<K: Kv<TokenMetadata>> {
    kv: Arc<K>,
}

fn internal_error(e: KvError) -> AuthError {
    let refid = Uuid::new_v4().to_string();
    error!(%refid, error = %e, "kv error in token registry");
    AuthError::internal(refid)
}

impl<K: Kv<TokenMetadata>> TokenRegistry<K> {
    pub fn new(kv: Arc<K>) -> Self {
        Self { kv }
    }

    /// Register a freshly-issued token, indexed by its owning `user_id` so
    /// an administrator can enumerate a user's live tokens (§4.3).
    pub async fn put(
        &self,
        meta: TokenMetadata,
        ttl: std::time::Duration,
    ) -> Result<(), AuthError> {
        let index = meta.user_id.to_string();
        self.kv
            .put(&meta.guid.to_string(), &meta, ttl, Some(&index))
            .await
            .map_err(internal_error)
    }

    /// Look up a token's metadata. `Ok(None)` means "revoked or expired",
    /// per §4.3 — never an error on its own.
    pub async fn get(&self, guid: Uuid) -> Result<Option<TokenMetadata>, AuthError> {
        match self.kv.get(&guid.to_string()).await {
            Ok(meta) => Ok(Some(meta)),
            Err(KvError::NotFound) => Ok(None),
            Err(e) => Err(internal_error(e)),
        }
    }

    /// Idempotent revocation (logout/revoke).
    pub async fn remove(&self, guid: Uuid) -> Result<(), AuthError> {
        self.kv.remove(&guid.to_string()).await.map_err(internal_error)
    }

    pub async fn list_by_user(&self, user_id: i64) -> Result<Vec<String>, AuthError> {
        self.kv
            .list_by_index(&user_id.to_string())
            .await
            .map_err(internal_error)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use fuzzly_kv::mem::MemKv;

    fn sample_meta(guid: Uuid, user_id: i64) -> TokenMetadata {
        TokenMetadata {
            guid,
            state: TokenState::Active,
            user_id,
            key_id: 1,
            algorithm: 0,
            version: "1".to_owned(),
            issued: Utc::now(),
            expires: Utc::now() + chrono::Duration::days(30),
            fingerprint: Vec::new(),
        }
    }

    #[tokio::test]
    async fn put_get_remove_roundtrip() {
        let registry = TokenRegistry::new(Arc::new(MemKv::new()));
        let guid = Uuid::new_v4();
        registry
            .put(sample_meta(guid, 42), std::time::Duration::from_secs(60))
            .await
            .unwrap();

        let fetched = registry.get(guid).await.unwrap().unwrap();
        assert_eq!(fetched.user_id, 42);
        assert_eq!(registry.list_by_user(42).await.unwrap(), vec![guid.to_string()]);

        registry.remove(guid).await.unwrap();
        assert!(registry.get(guid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_token_is_none_not_error() {
        let registry: TokenRegistry<MemKv> = TokenRegistry::new(Arc::new(MemKv::new()));
        assert!(registry.get(Uuid::new_v4()).await.unwrap().is_none());
    }
}
