//! C2: `KeyRing` — generates, persists, caches, and serves Ed25519 signing
//! keys, enforcing the validity windows in §4.1.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use fuzzly_crypto::{
    ed25519::{KeyPair, PublicKey, Signature},
    rng::SysRng,
};
use fuzzly_db::AuthDb;
use quick_cache::sync::Cache;
use tracing::{error, warn};
use uuid::Uuid;

use fuzzly_api_core::error::AuthError;

/// The algorithm id stored alongside `auth.token_keys` rows. Only Ed25519 is
/// defined (§3).
pub const ALGORITHM_ED25519: i16 = 0;
pub const ALGORITHM_NAME: &str = "ed25519";

/// Key rotation window (§4.1): processes independently pick the same
/// window boundaries so they agree on `key_id` for a given epoch.
pub const REFRESH_INTERVAL_SECS: i64 = 24 * 60 * 60;

/// A signing key currently minting tokens in this process (in-memory only).
#[derive(Clone)]
pub struct ActiveKey {
    pub key_pair: Arc<KeyPair>,
    pub key_id: i64,
    pub issued: DateTime<Utc>,
    pub validity_start: DateTime<Utc>,
    pub validity_end: DateTime<Utc>,
}

/// A self-signed public key, fetched and cached by [`KeyRing::public`].
#[derive(Clone)]
pub struct PublicKeyRecord {
    pub algorithm: i16,
    pub key_id: i64,
    pub public_key: PublicKey,
    pub signature: Signature,
    pub issued: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

fn floor_to_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let secs = now.timestamp();
    let start_secs = (secs.div_euclid(REFRESH_INTERVAL_SECS)) * REFRESH_INTERVAL_SECS;
    let start = Utc.timestamp_opt(start_secs, 0).single().expect("in range");
    let end = start + chrono::Duration::seconds(REFRESH_INTERVAL_SECS);
    (start, end)
}

pub struct KeyRing<D: AuthDb> {
    db: Arc<D>,
    active: Mutex<Option<ActiveKey>>,
    public_cache: Cache<(i16, i64), PublicKeyRecord>,
}

impl<D: AuthDb> KeyRing<D> {
    pub fn new(db: Arc<D>) -> Self {
        Self {
            db,
            active: Mutex::new(None),
            public_cache: Cache::new(1024),
        }
    }

    fn refid() -> String {
        Uuid::new_v4().to_string()
    }

    /// The key currently minting tokens, rotating into a fresh key pair if
    /// the cached one no longer covers `now` (§4.1).
    pub async fn active(&self, now: DateTime<Utc>) -> Result<ActiveKey, AuthError> {
        {
            let guard = self.active.lock().unwrap();
            if let Some(key) = guard.as_ref() {
                if key.validity_start <= now && now < key.validity_end {
                    return Ok(key.clone());
                }
            }
        }

        let (validity_start, validity_end) = floor_to_window(now);
        let mut rng = SysRng::new();
        let key_pair = KeyPair::generate(&mut rng).map_err(|e| {
            let refid = Self::refid();
            error!(%refid, error = %e, "failed to generate ed25519 key pair");
            AuthError::internal(refid)
        })?;
        let (spki, signature) = key_pair.self_sign_spki();
        let expires = now + chrono::Duration::days(30);

        let row = self
            .db
            .insert_signing_key(ALGORITHM_ED25519, &spki, signature.as_bytes(), expires)
            .await
            .map_err(|e| {
                let refid = Self::refid();
                error!(%refid, error = %e, "failed to persist signing key");
                AuthError::internal(refid)
            })?;

        let active_key = ActiveKey {
            key_pair: Arc::new(key_pair),
            key_id: row.key_id,
            issued: row.issued,
            validity_start,
            validity_end,
        };

        *self.active.lock().unwrap() = Some(active_key.clone());
        self.public_cache.insert(
            (ALGORITHM_ED25519, row.key_id),
            PublicKeyRecord {
                algorithm: ALGORITHM_ED25519,
                key_id: row.key_id,
                public_key: active_key.key_pair.public_key(),
                signature,
                issued: row.issued,
                expires: row.expires,
            },
        );

        Ok(active_key)
    }

    /// Fetch a public key record by `(algorithm, key_id)`, consulting the
    /// local cache first. Self-signature verification happens on every
    /// store fetch (§4.1); cached entries were already verified once.
    pub async fn public(
        &self,
        algorithm: i16,
        key_id: i64,
    ) -> Result<PublicKeyRecord, AuthError> {
        if let Some(record) = self.public_cache.get(&(algorithm, key_id)) {
            return Ok(record);
        }

        let row = self.db.fetch_signing_key(algorithm, key_id).await.map_err(|e| {
            match e {
                fuzzly_db::DbError::NotFound => {
                    AuthError::not_found("no public key for (algorithm, key_id)")
                }
                other => {
                    let refid = Self::refid();
                    error!(%refid, error = %other, "failed to fetch signing key");
                    AuthError::internal(refid)
                }
            }
        })?;

        let public_key = PublicKey::from_der_spki(&row.public_key).map_err(|e| {
            let refid = Self::refid();
            error!(%refid, error = %e, "stored public key is not valid DER SPKI");
            AuthError::internal(refid)
        })?;
        let signature = Signature::from_slice(&row.signature).map_err(|e| {
            let refid = Self::refid();
            error!(%refid, error = %e, "stored signature has the wrong length");
            AuthError::internal(refid)
        })?;

        if public_key.verify_self_signature(&signature).is_err() {
            warn!(algorithm, key_id, "self-signature verification failed");
            return Err(AuthError::unauthorized("key self-signature is invalid"));
        }

        let record = PublicKeyRecord {
            algorithm: row.algorithm,
            key_id: row.key_id,
            public_key,
            signature,
            issued: row.issued,
            expires: row.expires,
        };
        self.public_cache.insert((algorithm, key_id), record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use fuzzly_db::mem::MemDb;

    #[tokio::test]
    async fn active_key_is_stable_within_window() {
        let ring = KeyRing::new(Arc::new(MemDb::new()));
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let a = ring.active(now).await.unwrap();
        let b = ring.active(now + chrono::Duration::minutes(5)).await.unwrap();
        assert_eq!(a.key_id, b.key_id);
    }

    #[tokio::test]
    async fn rotation_crosses_window_boundary() {
        let ring = KeyRing::new(Arc::new(MemDb::new()));
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let a = ring.active(t0).await.unwrap();
        let t1 = t0 + chrono::Duration::hours(25);
        let b = ring.active(t1).await.unwrap();
        assert_ne!(a.key_id, b.key_id);

        let record = ring.public(ALGORITHM_ED25519, a.key_id).await.unwrap();
        assert_eq!(record.public_key.as_bytes(), a.key_pair.public_key().as_bytes());
    }

    #[tokio::test]
    async fn public_key_not_found_is_not_found_error() {
        let ring: KeyRing<MemDb> = KeyRing::new(Arc::new(MemDb::new()));
        let err = ring.public(ALGORITHM_ED25519, 999).await.unwrap_err();
        assert_eq!(err.kind, fuzzly_api_core::error::AuthErrorKind::NotFound);
    }
}
