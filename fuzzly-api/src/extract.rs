//! Axum extractors wrapping [`fuzzly_auth::identity::RequestGate`] (§4.7):
//! [`Authenticated`] fails closed (401) when no token is presented,
//! [`MaybeAuthenticated`] attaches an anonymous identity instead.

use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::request::Parts,
};
use chrono::Utc;
use fuzzly_api_core::error::AuthError;
use fuzzly_auth::{ban_registry::BanRegistry, identity::Identity};
use fuzzly_db::AuthDb;
use fuzzly_kv::Kv;

use crate::{cookie, state::ApiState};

async fn gate_identity<D, K>(
    parts: &mut Parts,
    state: &Arc<ApiState<D, K>>,
    route_requires_auth: bool,
) -> Result<Identity, AuthError>
where
    D: AuthDb,
    K: Kv<fuzzly_auth::token_registry::TokenMetadata>,
{
    let client_host = parts
        .extensions
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let cf_connecting_ip = parts
        .headers
        .get("cf-connecting-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let auth_header = parts
        .headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let cookie = cookie::read_auth_cookie(&parts.headers);

    state
        .auth
        .gate
        .authenticate(
            Utc::now(),
            parts.uri.path(),
            client_host.as_deref(),
            cf_connecting_ip.as_deref(),
            auth_header.as_deref(),
            cookie.as_deref(),
            route_requires_auth,
        )
        .await
}

/// An identity that is guaranteed authenticated (not banned, token
/// verified); rejects the request with `401` otherwise.
pub struct Authenticated(pub Identity);

impl<D, K> FromRequestParts<Arc<ApiState<D, K>>> for Authenticated
where
    D: AuthDb + 'static,
    K: Kv<fuzzly_auth::token_registry::TokenMetadata> + 'static,
{
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ApiState<D, K>>,
    ) -> Result<Self, Self::Rejection> {
        gate_identity(parts, state, true).await.map(Authenticated)
    }
}

/// An identity that may be anonymous (`user_id == -1`); never rejects on
/// missing auth, but still enforces IP/user bans.
pub struct MaybeAuthenticated(pub Identity);

impl<D, K> FromRequestParts<Arc<ApiState<D, K>>> for MaybeAuthenticated
where
    D: AuthDb + 'static,
    K: Kv<fuzzly_auth::token_registry::TokenMetadata> + 'static,
{
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ApiState<D, K>>,
    ) -> Result<Self, Self::Rejection> {
        gate_identity(parts, state, false).await.map(MaybeAuthenticated)
    }
}

/// Re-verify `identity` still carries `scope`, for handlers layered behind
/// [`Authenticated`] that additionally require a specific scope (§4.7
/// `verify_scope`).
pub async fn require_scope<D, K>(
    bans: &Arc<BanRegistry<D>>,
    state: &Arc<ApiState<D, K>>,
    identity: &Identity,
    scope: fuzzly_auth::scope::Scope,
) -> Result<(), AuthError>
where
    D: AuthDb,
    K: Kv<fuzzly_auth::token_registry::TokenMetadata>,
{
    let _ = bans;
    if state.auth.gate.verify_scope(Utc::now(), identity, scope).await? {
        Ok(())
    } else {
        Err(AuthError::forbidden("insufficient scope"))
    }
}
