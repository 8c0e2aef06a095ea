//! The auth-relevant HTTP subset (§6): route table, request parsing, and
//! response assembly. Everything that isn't pure routing glue — login
//! rules, token issuance, scope checks — lives in `fuzzly-auth` and is only
//! invoked here.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{ConnectInfo, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use fuzzly_api_core::{
    dto::{
        BotCreateResponse, BotLoginRequest, ChangePasswordRequest, CreateAccountRequest,
        FinalizeAccountRequest, LoginRequest,
    },
    error::AuthError,
};
use fuzzly_auth::{scope::Scope, token_registry::TokenMetadata};
use fuzzly_crypto::rng::SysRng;
use fuzzly_db::AuthDb;
use fuzzly_kv::Kv;

use crate::{
    cookie,
    extract::{require_scope, Authenticated, MaybeAuthenticated},
    state::ApiState,
};

const FINGERPRINT_HEADER: &str = "kh-fp";

fn client_ip(headers: &HeaderMap, addr: Option<SocketAddr>) -> Option<String> {
    headers
        .get("cf-connecting-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .or_else(|| addr.map(|a| a.ip().to_string()))
}

fn fingerprint(headers: &HeaderMap) -> Option<String> {
    headers
        .get(FINGERPRINT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// Wires the auth-relevant routes from §6's table onto `state`. The caller
/// (`fuzzly-authd`) mounts this under the rest of the application's router
/// and layers tracing/timeouts/CORS around the whole thing.
pub fn router<D, K>(state: Arc<ApiState<D, K>>) -> Router
where
    D: AuthDb + 'static,
    K: Kv<TokenMetadata> + 'static,
{
    Router::new()
        .route("/v1/account/login", post(login::<D, K>))
        .route("/v1/account/logout", post(logout::<D, K>))
        .route("/v1/account/create", post(create_account::<D, K>))
        .route("/v1/account/finalize", post(finalize_account::<D, K>))
        .route("/v1/account/change_password", post(change_password::<D, K>))
        .route("/v1/account/bot_login", post(bot_login::<D, K>))
        .route("/v1/account/bot_create", get(bot_create::<D, K>))
        .route("/v1/account/bot_internal", get(bot_internal::<D, K>))
        .with_state(state)
}

async fn login<D, K>(
    State(state): State<Arc<ApiState<D, K>>>,
    MaybeAuthenticated(_identity): MaybeAuthenticated,
    addr: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<Response, AuthError>
where
    D: AuthDb,
    K: Kv<TokenMetadata>,
{
    let now = Utc::now();
    let mut rng = SysRng::new();
    let ip = client_ip(&headers, addr.map(|ConnectInfo(a)| a));
    let fp = fingerprint(&headers);

    let response = state
        .auth
        .authenticator
        .login(&mut rng, now, &body.email, &body.password, body.otp.as_deref(), ip.as_deref(), fp.as_deref())
        .await?;

    let expires = chrono::DateTime::from_timestamp(response.token.expires, 0).unwrap_or(now);
    let set_cookie = cookie::build_set_cookie(&response.token.token, expires, now, state.environment.secure_cookies());

    let mut resp = Json(response).into_response();
    resp.headers_mut().insert(axum::http::header::SET_COOKIE, set_cookie);
    Ok(resp)
}

async fn logout<D, K>(
    State(state): State<Arc<ApiState<D, K>>>,
    Authenticated(identity): Authenticated,
) -> Result<Response, AuthError>
where
    D: AuthDb,
    K: Kv<TokenMetadata>,
{
    let now = Utc::now();
    if let Some(raw) = &identity.raw_token {
        let token = state.auth.codec.decode(now, raw).await?;
        state.auth.codec.revoke(token.guid).await?;
    }

    let mut resp = axum::http::StatusCode::NO_CONTENT.into_response();
    resp.headers_mut()
        .insert(axum::http::header::SET_COOKIE, cookie::build_clear_cookie(state.environment.secure_cookies()));
    Ok(resp)
}

async fn create_account<D, K>(
    State(state): State<Arc<ApiState<D, K>>>,
    MaybeAuthenticated(_identity): MaybeAuthenticated,
    Json(body): Json<CreateAccountRequest>,
) -> Result<axum::http::StatusCode, AuthError>
where
    D: AuthDb,
    K: Kv<TokenMetadata>,
{
    state.auth.account_flow.create_account(Utc::now(), &body.email, &body.name).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

async fn finalize_account<D, K>(
    State(state): State<Arc<ApiState<D, K>>>,
    MaybeAuthenticated(_identity): MaybeAuthenticated,
    Json(body): Json<FinalizeAccountRequest>,
) -> Result<Response, AuthError>
where
    D: AuthDb,
    K: Kv<TokenMetadata>,
{
    let now = Utc::now();
    let mut rng = SysRng::new();
    let response = state
        .auth
        .account_flow
        .finalize_account(&mut rng, now, &body.name, &body.handle, &body.password, &body.token)
        .await?;

    let expires = chrono::DateTime::from_timestamp(response.token.expires, 0).unwrap_or(now);
    let set_cookie = cookie::build_set_cookie(&response.token.token, expires, now, state.environment.secure_cookies());
    let mut resp = Json(response).into_response();
    resp.headers_mut().insert(axum::http::header::SET_COOKIE, set_cookie);
    Ok(resp)
}

async fn change_password<D, K>(
    State(state): State<Arc<ApiState<D, K>>>,
    Authenticated(identity): Authenticated,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<axum::http::StatusCode, AuthError>
where
    D: AuthDb,
    K: Kv<TokenMetadata>,
{
    require_scope(&state.auth.bans, &state, &identity, Scope::User).await?;
    let mut rng = SysRng::new();
    state
        .auth
        .authenticator
        .change_password(&mut rng, &body.email, &body.password, &body.new_password)
        .await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

async fn bot_login<D, K>(
    State(state): State<Arc<ApiState<D, K>>>,
    MaybeAuthenticated(_identity): MaybeAuthenticated,
    Json(body): Json<BotLoginRequest>,
) -> Result<Json<fuzzly_api_core::dto::TokenResponse>, AuthError>
where
    D: AuthDb,
    K: Kv<TokenMetadata>,
{
    let now = Utc::now();
    let mut rng = SysRng::new();
    let token = state.auth.authenticator.bot_login(&mut rng, now, &body.token).await?;
    Ok(Json(token))
}

async fn bot_create<D, K>(
    State(state): State<Arc<ApiState<D, K>>>,
    Authenticated(identity): Authenticated,
) -> Result<Json<BotCreateResponse>, AuthError>
where
    D: AuthDb,
    K: Kv<TokenMetadata>,
{
    require_scope(&state.auth.bans, &state, &identity, Scope::User).await?;
    let mut rng = SysRng::new();
    let token = state
        .auth
        .authenticator
        .bot_create(&mut rng, Some(identity.user_id), false, Some(identity.user_id))
        .await?;
    Ok(Json(BotCreateResponse { token }))
}

async fn bot_internal<D, K>(
    State(state): State<Arc<ApiState<D, K>>>,
    Authenticated(identity): Authenticated,
) -> Result<Json<BotCreateResponse>, AuthError>
where
    D: AuthDb,
    K: Kv<TokenMetadata>,
{
    require_scope(&state.auth.bans, &state, &identity, Scope::Admin).await?;
    let mut rng = SysRng::new();
    let token = state.auth.authenticator.bot_create(&mut rng, None, true, Some(identity.user_id)).await?;
    Ok(Json(BotCreateResponse { token }))
}

#[cfg(test)]
mod test {
    use std::net::SocketAddr;

    use axum::{body::Body, http::Request};
    use fuzzly_crypto::password::Argon2Params;
    use fuzzly_db::mem::MemDb;
    use fuzzly_kv::mem::MemKv;
    use fuzzly_auth::{AuthState, AuthStateConfig};
    use tower::ServiceExt;

    use super::*;
    use crate::state::Environment;

    fn app() -> Router {
        let db = Arc::new(MemDb::new());
        let kv = Arc::new(MemKv::new());
        let config = AuthStateConfig {
            secrets: vec![b"pepper-0".to_vec()],
            argon2: Argon2Params::default(),
            ip_salt: b"ip-salt".to_vec(),
            openapi_path: "/openapi.json".to_owned(),
        };
        let auth: AuthState<MemDb, MemKv> = AuthState::new(db, kv, config).unwrap();
        let state = Arc::new(ApiState::new(Arc::new(auth), Environment::Local));
        router(state)
    }

    #[tokio::test]
    async fn create_account_returns_no_content() {
        let app = app();
        let body = serde_json::json!({"email": "alice@example.com", "name": "Alice"});
        let req = Request::builder()
            .method("POST")
            .uri("/v1/account/create")
            .header("content-type", "application/json")
            .extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 1234))))
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn login_without_body_returns_422() {
        let app = app();
        let req = Request::builder()
            .method("POST")
            .uri("/v1/account/login")
            .header("content-type", "application/json")
            .extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 1234))))
            .body(Body::from("{}"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn logout_without_token_is_unauthorized() {
        let app = app();
        let req = Request::builder()
            .method("POST")
            .uri("/v1/account/logout")
            .extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 1234))))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::UNAUTHORIZED);
    }
}
