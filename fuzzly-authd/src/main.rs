//! Bootstrap binary for the auth subsystem: wires the Postgres/Redis-backed
//! [`fuzzly_auth::AuthState`] and serves the §6 HTTP surface over axum.
//!
//! Global singletons (the DB pool, the Redis connection manager, the
//! `AuthState` dependency graph) are constructed once here and passed down
//! through router state (§9: "construct once during application bootstrap
//! and pass through a context/handle argument").

mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use fuzzly_api::state::ApiState;
use fuzzly_auth::{AuthState, AuthStateConfig};
use fuzzly_db::postgres::PostgresDb;
use fuzzly_kv::redis_kv::RedisKv;
use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;
use tower::{timeout::TimeoutLayer, ServiceBuilder};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use config::Config;

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config = Config::from_env().context("failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .acquire_timeout(config.db_pool_acquire_timeout)
        .connect(&config.database_url)
        .await
        .context("failed to connect to postgres")?;
    let db = Arc::new(PostgresDb::new(pool));

    let redis_client = redis::Client::open(config.redis_url.clone()).context("invalid REDIS_URL")?;
    let conn = ConnectionManager::new(redis_client).await.context("failed to connect to redis")?;
    let kv = Arc::new(RedisKv::new(conn, "fuzzly:auth:token"));

    let auth_config = AuthStateConfig {
        secrets: config.secrets,
        argon2: config.argon2,
        ip_salt: config.ip_salt,
        openapi_path: config.openapi_path,
    };
    let auth: AuthState<PostgresDb, RedisKv<fuzzly_auth::token_registry::TokenMetadata>> =
        AuthState::new(db, kv, auth_config).context("failed to construct auth state")?;

    let api_state = Arc::new(ApiState::new(Arc::new(auth), config.environment));
    let router = fuzzly_api::routes::router(api_state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
            .layer(CorsLayer::permissive()),
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "fuzzly-authd listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining in-flight requests");
}
