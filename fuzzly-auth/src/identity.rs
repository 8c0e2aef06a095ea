//! C8: `RequestGate` — the transport-layer enforcement point (§4.7): extracts
//! the bearer token, verifies it, checks IP and user bans, and populates the
//! request [`Identity`] that handlers use to authorize themselves.
//!
//! `fuzzly-api` wraps this in an axum extractor/middleware; everything here
//! is transport-agnostic so it can be unit tested without standing up a
//! server.

use std::{collections::BTreeSet, sync::Arc};

use chrono::{DateTime, Utc};
use fuzzly_db::AuthDb;
use fuzzly_kv::Kv;

use fuzzly_api_core::error::AuthError;

use crate::{
    ban_registry::BanRegistry, scope::Scope, token_codec::TokenCodec,
    token_registry::TokenMetadata,
};

/// The request-scoped identity populated by [`RequestGate::authenticate`]
/// (§4.7 step 8). `banned` is tri-state: `None` means "no token was
/// presented, so banned status is unknown", matching the source's
/// `banned=null` for anonymous requests.
#[derive(Clone, Debug)]
pub struct Identity {
    pub user_id: i64,
    pub raw_token: Option<String>,
    pub scope: BTreeSet<Scope>,
    pub banned: Option<bool>,
}

impl Identity {
    /// The unauthenticated identity attached when no token is present on a
    /// route that doesn't require one (§4.7 step 4).
    pub fn anonymous() -> Self {
        Self {
            user_id: -1,
            raw_token: None,
            scope: BTreeSet::from([Scope::Default]),
            banned: None,
        }
    }
}

/// Strip a leading auth scheme (`Bearer `, etc.) from a raw header/cookie
/// value (§4.7 step 3). A value with no scheme prefix is returned as-is.
fn strip_scheme(raw: &str) -> &str {
    let trimmed = raw.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((_scheme, rest)) => rest.trim(),
        None => trimmed,
    }
}

pub struct RequestGate<D: AuthDb, K: Kv<TokenMetadata>> {
    codec: Arc<TokenCodec<D, K>>,
    bans: Arc<BanRegistry<D>>,
    /// The OpenAPI document path, which passes through unauthenticated
    /// regardless of route requirements (§4.7 step 1).
    openapi_path: String,
}

impl<D: AuthDb, K: Kv<TokenMetadata>> RequestGate<D, K> {
    pub fn new(
        codec: Arc<TokenCodec<D, K>>,
        bans: Arc<BanRegistry<D>>,
        openapi_path: impl Into<String>,
    ) -> Self {
        Self { codec, bans, openapi_path: openapi_path.into() }
    }

    /// Run the full gate sequence (§4.7 steps 1-8) and return the populated
    /// [`Identity`], or the typed error the request should fail with.
    #[allow(clippy::too_many_arguments)]
    pub async fn authenticate(
        &self,
        now: DateTime<Utc>,
        path: &str,
        client_host: Option<&str>,
        cf_connecting_ip: Option<&str>,
        auth_header: Option<&str>,
        cookie: Option<&str>,
        route_requires_auth: bool,
    ) -> Result<Identity, AuthError> {
        if path == self.openapi_path {
            return Ok(Identity::anonymous());
        }

        let Some(client_host) = client_host else {
            return Err(AuthError::bad_request("no client address available"));
        };

        let raw_token = auth_header.or(cookie).map(strip_scheme).filter(|s| !s.is_empty());

        let Some(raw_token) = raw_token else {
            if route_requires_auth {
                return Err(AuthError::unauthorized("authentication required"));
            }
            return Ok(Identity::anonymous());
        };

        for ip in [cf_connecting_ip, Some(client_host)].into_iter().flatten() {
            if self.bans.ip_ban(ip).await?.is_some() {
                return Err(AuthError::forbidden("this ip address is banned"));
            }
        }

        let token = self.codec.decode(now, raw_token).await?;

        if let Some(ban) = self.bans.user_ban(token.user_id).await? {
            if ban.completed > now {
                if ban.ban_type == fuzzly_db::models::BanType::Ip {
                    let offending_ip = cf_connecting_ip.unwrap_or(client_host);
                    self.bans.record_ip_ban(offending_ip, ban.ban_id).await?;
                    return Err(AuthError::forbidden("this ip address is banned"));
                }
                return Ok(Identity {
                    user_id: token.user_id,
                    raw_token: Some(raw_token.to_owned()),
                    scope: BTreeSet::from([Scope::Default]),
                    banned: Some(true),
                });
            }
        }

        let scope: BTreeSet<Scope> = token
            .scope()
            .iter()
            .filter_map(|s| Scope::from_str_opt(s))
            .collect();
        let scope = if scope.is_empty() { BTreeSet::from([Scope::Default]) } else { scope };

        Ok(Identity { user_id: token.user_id, raw_token: Some(raw_token.to_owned()), scope, banned: Some(false) })
    }

    /// `true` iff not banned and the token still verifies right now,
    /// re-decoding to catch revocation that happened between hops (§4.7).
    pub async fn authenticated(&self, now: DateTime<Utc>, identity: &Identity) -> Result<bool, AuthError> {
        if identity.banned == Some(true) {
            return Ok(false);
        }
        match &identity.raw_token {
            None => Ok(false),
            Some(raw) => match self.codec.decode(now, raw).await {
                Ok(_) => Ok(true),
                Err(e) if e.kind == fuzzly_api_core::error::AuthErrorKind::Unauthorized => Ok(false),
                Err(e) => Err(e),
            },
        }
    }

    /// `authenticated() && scope ∈ identity.scope` (§4.7).
    pub async fn verify_scope(
        &self,
        now: DateTime<Utc>,
        identity: &Identity,
        scope: Scope,
    ) -> Result<bool, AuthError> {
        Ok(self.authenticated(now, identity).await? && identity.scope.contains(&scope))
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use chrono::TimeZone;
    use fuzzly_db::{
        mem::MemDb,
        models::{BanRow, BanType},
    };
    use fuzzly_kv::mem::MemKv;
    use serde_json::json;

    use super::*;
    use crate::{key_ring::KeyRing, token_registry::TokenRegistry};

    fn gate() -> (RequestGate<MemDb, MemKv>, Arc<TokenCodec<MemDb, MemKv>>, Arc<MemDb>) {
        let db = Arc::new(MemDb::new());
        let key_ring = Arc::new(KeyRing::new(db.clone()));
        let registry = Arc::new(TokenRegistry::new(Arc::new(MemKv::new())));
        let codec = Arc::new(TokenCodec::new(key_ring, registry));
        let bans = Arc::new(BanRegistry::new(db.clone(), b"ip-salt".to_vec()));
        (RequestGate::new(codec.clone(), bans, "/openapi.json"), codec, db)
    }

    #[tokio::test]
    async fn missing_token_on_open_route_is_anonymous() {
        let (gate, _codec, _db) = gate();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let identity = gate
            .authenticate(now, "/v1/account/login", Some("127.0.0.1"), None, None, None, false)
            .await
            .unwrap();
        assert_eq!(identity.user_id, -1);
        assert!(identity.banned.is_none());
    }

    #[tokio::test]
    async fn missing_token_on_gated_route_is_unauthorized() {
        let (gate, _codec, _db) = gate();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let err = gate
            .authenticate(now, "/v1/account/logout", Some("127.0.0.1"), None, None, None, true)
            .await
            .unwrap_err();
        assert_eq!(err.kind, fuzzly_api_core::error::AuthErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn valid_token_populates_scope() {
        let (gate, codec, _db) = gate();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let issued = codec.issue(now, 5, json!({"scope": ["user"]}), None).await.unwrap();
        let bearer = format!("Bearer {}", issued.token);

        let identity = gate
            .authenticate(now, "/v1/posts", Some("127.0.0.1"), None, Some(&bearer), None, true)
            .await
            .unwrap();
        assert_eq!(identity.user_id, 5);
        assert!(identity.scope.contains(&Scope::User));
        assert!(gate.verify_scope(now, &identity, Scope::User).await.unwrap());
        assert!(!gate.verify_scope(now, &identity, Scope::Admin).await.unwrap());
    }

    #[tokio::test]
    async fn ip_ban_short_circuits_before_token_decode() {
        let (gate, _codec, db) = gate();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let bans = BanRegistry::new(db, b"ip-salt".to_vec());
        bans.record_ip_ban("9.9.9.9", 1).await.unwrap();
        // share the same salt/db-backed ban state through a second registry
        let err = RequestGate::new(
            {
                let db = Arc::new(MemDb::new());
                let key_ring = Arc::new(KeyRing::new(db.clone()));
                let registry = Arc::new(TokenRegistry::new(Arc::new(MemKv::new())));
                Arc::new(TokenCodec::new(key_ring, registry))
            },
            Arc::new(bans),
            "/openapi.json",
        )
        .authenticate(now, "/v1/posts", Some("9.9.9.9"), None, None, None, false)
        .await
        .unwrap_err();
        assert_eq!(err.kind, fuzzly_api_core::error::AuthErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn user_ban_marks_identity_banned_without_forbidding_outright() {
        let (gate, codec, db) = gate();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let issued = codec.issue(now, 11, json!({"scope": ["user"]}), None).await.unwrap();
        db.seed_ban(BanRow {
            ban_id: db.next_ban_id(),
            ban_type: BanType::User,
            user_id: 11,
            created: now,
            completed: now + chrono::Duration::hours(1),
            reason: None,
        });

        let identity = gate
            .authenticate(now, "/v1/posts", Some("127.0.0.1"), None, Some(&issued.token), None, true)
            .await
            .unwrap();
        assert_eq!(identity.banned, Some(true));
        assert!(!gate.authenticated(now, &identity).await.unwrap());
        assert!(!gate.verify_scope(now, &identity, Scope::User).await.unwrap());
    }
}
