//! C3: `TokenCodec` — encodes, signs, decodes, and verifies bearer tokens
//! (§4.2). The wire format is normative: re-implementations must produce
//! byte-identical tokens given the same inputs and same keys.
//!
//! ```text
//! b64(version) "." b64(payload) "." b64(signature)
//! payload := algorithm "." b64(key_id_be) "." b64(expires_be) "."
//!            b64(user_id_be) "." b64(guid_bytes) "." json_claims
//! ```
//! `b64` is URL-safe base64 without padding; integers are big-endian,
//! minimum-width (zero encodes as zero-length).

use std::sync::{Arc, Mutex};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use fuzzly_db::AuthDb;
use fuzzly_kv::Kv;
use fuzzly_std::int_codec::{decode_be_min, decode_be_min_i64, encode_be_min};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::key_ring::{KeyRing, ALGORITHM_ED25519, ALGORITHM_NAME, REFRESH_INTERVAL_SECS};
use crate::token_registry::{TokenMetadata, TokenRegistry, TokenState};
use fuzzly_api_core::{dto::TokenResponse, error::AuthError};

const VERSION: &str = "1";
const DEFAULT_VALIDITY_DAYS: i64 = 30;
/// Decode results are cached for a short TTL (§4.2), keyed by the raw token
/// string; negative results are never cached.
const DECODE_CACHE_TTL_SECS: i64 = 30;

fn algorithm_id(name: &str) -> Option<i16> {
    match name {
        ALGORITHM_NAME => Some(ALGORITHM_ED25519),
        _ => None,
    }
}

fn algorithm_name(id: i16) -> Option<&'static str> {
    match id {
        ALGORITHM_ED25519 => Some(ALGORITHM_NAME),
        _ => None,
    }
}

/// A decoded, fully-verified bearer token.
#[derive(Clone, Debug)]
pub struct AuthToken {
    pub user_id: i64,
    pub key_id: i64,
    pub algorithm: i16,
    pub guid: Uuid,
    pub expires: DateTime<Utc>,
    pub claims: Value,
}

impl AuthToken {
    /// The `scope` claim, or an empty set if absent/malformed.
    pub fn scope(&self) -> Vec<String> {
        self.claims
            .get("scope")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect()
            })
            .unwrap_or_default()
    }

    pub fn fp(&self) -> Option<&str> {
        self.claims.get("fp").and_then(Value::as_str)
    }

    pub fn email(&self) -> Option<&str> {
        self.claims.get("email").and_then(Value::as_str)
    }

    /// The purpose-token discriminator (§4.6: `create-account`,
    /// `recover-account`, `otp`, `remove-otp`).
    pub fn purpose(&self) -> Option<&str> {
        self.claims.get("key").and_then(Value::as_str)
    }
}

struct CacheEntry {
    token: AuthToken,
    cached_at: DateTime<Utc>,
}

pub struct TokenCodec<D: AuthDb, K: Kv<TokenMetadata>> {
    key_ring: Arc<KeyRing<D>>,
    registry: Arc<TokenRegistry<K>>,
    decode_cache: Mutex<std::collections::HashMap<String, CacheEntry>>,
}

impl<D: AuthDb, K: Kv<TokenMetadata>> TokenCodec<D, K> {
    pub fn new(key_ring: Arc<KeyRing<D>>, registry: Arc<TokenRegistry<K>>) -> Self {
        Self {
            key_ring,
            registry,
            decode_cache: Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn default_expires(now: DateTime<Utc>) -> DateTime<Utc> {
        let secs = now.timestamp();
        let start = (secs.div_euclid(REFRESH_INTERVAL_SECS)) * REFRESH_INTERVAL_SECS;
        Utc.timestamp_opt(start, 0).single().expect("in range")
            + chrono::Duration::days(DEFAULT_VALIDITY_DAYS)
    }

    /// Issue a bearer token for `user_id` carrying `claims`. `ttl` overrides
    /// the default 30-day/refresh-interval-anchored expiry (used for
    /// short-lived purpose tokens, §4.6).
    pub async fn issue(
        &self,
        now: DateTime<Utc>,
        user_id: i64,
        claims: Value,
        ttl: Option<chrono::Duration>,
    ) -> Result<TokenResponse, AuthError> {
        let expires = match ttl {
            Some(ttl) => now + ttl,
            None => Self::default_expires(now),
        };

        let active_key = self.key_ring.active(now).await?;
        let guid = Uuid::new_v4();

        let key_id_be = encode_be_min(u64::try_from(active_key.key_id).unwrap_or(0));
        let expires_be = encode_be_min(u64::try_from(expires.timestamp()).unwrap_or(0));
        let user_id_be = encode_be_min(u64::try_from(user_id).unwrap_or(0));
        let claims_json =
            serde_json::to_string(&claims).map_err(|_| AuthError::bad_request("bad claims"))?;

        let payload = format!(
            "{alg}.{key_id}.{expires}.{user_id}.{guid}.{claims}",
            alg = ALGORITHM_NAME,
            key_id = URL_SAFE_NO_PAD.encode(key_id_be),
            expires = URL_SAFE_NO_PAD.encode(expires_be),
            user_id = URL_SAFE_NO_PAD.encode(user_id_be),
            guid = URL_SAFE_NO_PAD.encode(guid.as_bytes()),
            claims = claims_json,
        );

        let content = format!(
            "{version}.{payload}",
            version = URL_SAFE_NO_PAD.encode(VERSION.as_bytes()),
            payload = URL_SAFE_NO_PAD.encode(&payload),
        );

        let signature = active_key.key_pair.sign_raw(content.as_bytes());
        let token = format!("{content}.{sig}", sig = URL_SAFE_NO_PAD.encode(signature.as_bytes()));

        let fingerprint = claims
            .get("fp")
            .and_then(Value::as_str)
            .map(|s| s.as_bytes().to_vec())
            .unwrap_or_default();

        let meta = TokenMetadata {
            guid,
            state: TokenState::Active,
            user_id,
            key_id: active_key.key_id,
            algorithm: ALGORITHM_ED25519,
            version: VERSION.to_owned(),
            issued: now,
            expires,
            fingerprint,
        };
        let record_ttl = (expires - now).to_std().unwrap_or(std::time::Duration::from_secs(1));
        self.registry.put(meta, record_ttl).await?;

        Ok(TokenResponse {
            version: VERSION.to_owned(),
            algorithm: ALGORITHM_NAME.to_owned(),
            key_id: active_key.key_id,
            issued: now.timestamp(),
            expires: expires.timestamp(),
            token,
        })
    }

    /// Decode and fully verify a bearer token (§4.2).
    pub async fn decode(&self, now: DateTime<Utc>, token: &str) -> Result<AuthToken, AuthError> {
        if let Some(entry) = self.decode_cache.lock().unwrap().get(token) {
            if (now - entry.cached_at).num_seconds() < DECODE_CACHE_TTL_SECS {
                return Ok(entry.token.clone());
            }
        }

        let (content, b64sig) = token
            .rsplit_once('.')
            .ok_or_else(|| AuthError::bad_request("malformed token"))?;
        let (b64version, b64payload) = content
            .split_once('.')
            .ok_or_else(|| AuthError::bad_request("malformed token"))?;

        let version_bytes = URL_SAFE_NO_PAD
            .decode(b64version)
            .map_err(|_| AuthError::bad_request("malformed token version"))?;
        let version = String::from_utf8(version_bytes)
            .map_err(|_| AuthError::bad_request("malformed token version"))?;
        if version != VERSION {
            return Err(AuthError::bad_request("unsupported token version"));
        }

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(b64payload)
            .map_err(|_| AuthError::bad_request("malformed token payload"))?;
        let payload = String::from_utf8(payload_bytes)
            .map_err(|_| AuthError::bad_request("malformed token payload"))?;

        let mut parts = payload.splitn(6, '.');
        let algorithm_str =
            parts.next().ok_or_else(|| AuthError::bad_request("malformed token payload"))?;
        let key_id_b64 =
            parts.next().ok_or_else(|| AuthError::bad_request("malformed token payload"))?;
        let expires_b64 =
            parts.next().ok_or_else(|| AuthError::bad_request("malformed token payload"))?;
        let user_id_b64 =
            parts.next().ok_or_else(|| AuthError::bad_request("malformed token payload"))?;
        let guid_b64 =
            parts.next().ok_or_else(|| AuthError::bad_request("malformed token payload"))?;
        let claims_json =
            parts.next().ok_or_else(|| AuthError::bad_request("malformed token payload"))?;

        let algorithm = algorithm_id(algorithm_str)
            .ok_or_else(|| AuthError::bad_request("unknown key algorithm"))?;

        let key_id_bytes = URL_SAFE_NO_PAD
            .decode(key_id_b64)
            .map_err(|_| AuthError::bad_request("malformed key id"))?;
        let key_id = decode_be_min_i64(&key_id_bytes)
            .ok_or_else(|| AuthError::bad_request("malformed key id"))?;
        if key_id <= 0 {
            return Err(AuthError::unauthorized("invalid key id"));
        }

        let expires_bytes = URL_SAFE_NO_PAD
            .decode(expires_b64)
            .map_err(|_| AuthError::bad_request("malformed expiry"))?;
        let expires_secs = decode_be_min(&expires_bytes)
            .ok_or_else(|| AuthError::bad_request("malformed expiry"))?;
        let expires = Utc
            .timestamp_opt(expires_secs as i64, 0)
            .single()
            .ok_or_else(|| AuthError::bad_request("malformed expiry"))?;
        if now > expires {
            return Err(AuthError::unauthorized("token has expired"));
        }

        let user_id_bytes = URL_SAFE_NO_PAD
            .decode(user_id_b64)
            .map_err(|_| AuthError::bad_request("malformed user id"))?;
        let user_id = decode_be_min_i64(&user_id_bytes)
            .ok_or_else(|| AuthError::bad_request("malformed user id"))?;

        let guid_bytes = URL_SAFE_NO_PAD
            .decode(guid_b64)
            .map_err(|_| AuthError::bad_request("malformed guid"))?;
        let guid = Uuid::from_slice(&guid_bytes)
            .map_err(|_| AuthError::bad_request("malformed guid"))?;

        let public = self.key_ring.public(algorithm, key_id).await?;
        if now > public.expires {
            return Err(AuthError::unauthorized("signing key has expired"));
        }

        let signature_bytes = URL_SAFE_NO_PAD
            .decode(b64sig)
            .map_err(|_| AuthError::bad_request("malformed signature"))?;
        let signature = fuzzly_crypto::ed25519::Signature::from_slice(&signature_bytes)
            .map_err(|_| AuthError::bad_request("malformed signature"))?;
        if public.public_key.verify_raw(content.as_bytes(), &signature).is_err() {
            warn!(key_id, "token signature verification failed");
            return Err(AuthError::unauthorized("Key validation failed."));
        }

        let meta = self
            .registry
            .get(guid)
            .await?
            .ok_or_else(|| AuthError::unauthorized("This token is no longer valid."))?;
        if !matches!(meta.state, TokenState::Active) {
            return Err(AuthError::unauthorized("This token is no longer valid."));
        }
        if meta.algorithm != algorithm {
            return Err(AuthError::unauthorized("token algorithm mismatch"));
        }
        if meta.key_id != key_id {
            return Err(AuthError::unauthorized("token key id mismatch"));
        }
        if meta.expires.timestamp() != expires.timestamp() {
            return Err(AuthError::unauthorized("token expiry mismatch"));
        }

        let claims: Value = serde_json::from_str(claims_json)
            .map_err(|_| AuthError::bad_request("malformed claims"))?;

        let auth_token = AuthToken { user_id, key_id, algorithm, guid, expires, claims };

        self.decode_cache.lock().unwrap().insert(
            token.to_owned(),
            CacheEntry { token: auth_token.clone(), cached_at: now },
        );

        Ok(auth_token)
    }

    /// Revoke a token by `guid` (logout). Idempotent.
    pub async fn revoke(&self, guid: Uuid) -> Result<(), AuthError> {
        self.registry.remove(guid).await
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use chrono::TimeZone;
    use fuzzly_db::mem::MemDb;
    use fuzzly_kv::mem::MemKv;
    use serde_json::json;

    use super::*;
    use crate::key_ring::KeyRing;

    fn codec() -> TokenCodec<MemDb, MemKv> {
        let key_ring = Arc::new(KeyRing::new(Arc::new(MemDb::new())));
        let registry = Arc::new(TokenRegistry::new(Arc::new(MemKv::new())));
        TokenCodec::new(key_ring, registry)
    }

    #[tokio::test]
    async fn issue_then_decode_roundtrips() {
        let codec = codec();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let claims = json!({"scope": ["user"], "email": "alice@example.com"});
        let issued = codec.issue(now, 42, claims.clone(), None).await.unwrap();

        let decoded = codec.decode(now, &issued.token).await.unwrap();
        assert_eq!(decoded.user_id, 42);
        assert_eq!(decoded.claims, claims);
        assert_eq!(decoded.scope(), vec!["user".to_owned()]);
    }

    #[tokio::test]
    async fn revoked_token_fails_to_decode() {
        let codec = codec();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let issued = codec.issue(now, 7, json!({}), None).await.unwrap();
        let decoded = codec.decode(now, &issued.token).await.unwrap();

        codec.revoke(decoded.guid).await.unwrap();
        let err = codec.decode(now, &issued.token).await.unwrap_err();
        assert_eq!(err.kind, fuzzly_api_core::error::AuthErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn tampered_token_fails_signature_check() {
        let codec = codec();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let issued = codec.issue(now, 7, json!({}), None).await.unwrap();
        let mut tampered = issued.token.clone();
        tampered.push('x');
        assert!(codec.decode(now, &tampered).await.is_err());
    }

    #[tokio::test]
    async fn short_ttl_purpose_token_expires() {
        let codec = codec();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let issued = codec
            .issue(now, 0, json!({"key": "create-account"}), Some(chrono::Duration::seconds(900)))
            .await
            .unwrap();
        let later = now + chrono::Duration::seconds(901);
        let err = codec.decode(later, &issued.token).await.unwrap_err();
        assert_eq!(err.kind, fuzzly_api_core::error::AuthErrorKind::Unauthorized);
    }
}
