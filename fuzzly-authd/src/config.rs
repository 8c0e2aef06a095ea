//! Process bootstrap configuration, read from the environment (§6:
//! "Environment variables"). `.env` is loaded first via `dotenvy` so local
//! development doesn't need to export anything by hand.

use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use fuzzly_api::state::Environment;
use fuzzly_crypto::password::Argon2Params;

pub struct Config {
    pub environment: Environment,
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub redis_url: String,
    pub openapi_path: String,
    pub secrets: Vec<Vec<u8>>,
    pub ip_salt: Vec<u8>,
    pub argon2: Argon2Params,
    pub db_pool_acquire_timeout: Duration,
}

fn env_var(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("missing required environment variable {name}"))
}

fn env_var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_owned())
}

impl Config {
    /// Loads configuration from the process environment (falling back to a
    /// `.env` file, ignored if absent). `AUTH_SECRETS` is a `;`-separated
    /// list of hex-encoded peppers (§4.9: "a small ordered list of random
    /// server-side salt secrets"); at least one is required.
    pub fn from_env() -> Result<Self> {
        // A missing `.env` file is expected in production; only a malformed
        // one that exists is worth failing the boot over.
        let _ = dotenvy::dotenv();

        let environment = Environment::from_env_var(&env_var_or("ENVIRONMENT", "local"));

        let bind_addr: SocketAddr = env_var_or("BIND_ADDR", "0.0.0.0:8080")
            .parse()
            .context("BIND_ADDR must be a valid socket address")?;

        let secrets: Vec<Vec<u8>> = env_var("AUTH_SECRETS")?
            .split(';')
            .filter(|s| !s.is_empty())
            .map(|s| fuzzly_hex::decode(s).context("AUTH_SECRETS entries must be hex-encoded"))
            .collect::<Result<_>>()?;
        if secrets.is_empty() {
            anyhow::bail!("AUTH_SECRETS must contain at least one pepper");
        }

        let ip_salt = fuzzly_hex::decode(&env_var("IP_SALT")?).context("IP_SALT must be hex-encoded")?;

        let argon2 = Argon2Params {
            memory_kib: env_var_or("ARGON2_MEMORY_KIB", "19456").parse().context("ARGON2_MEMORY_KIB")?,
            iterations: env_var_or("ARGON2_ITERATIONS", "2").parse().context("ARGON2_ITERATIONS")?,
            parallelism: env_var_or("ARGON2_PARALLELISM", "1").parse().context("ARGON2_PARALLELISM")?,
        };

        Ok(Self {
            environment,
            bind_addr,
            database_url: env_var("DATABASE_URL")?,
            redis_url: env_var("REDIS_URL")?,
            openapi_path: env_var_or("OPENAPI_PATH", "/openapi.json"),
            secrets,
            ip_salt,
            argon2,
            db_pool_acquire_timeout: Duration::from_secs(10),
        })
    }
}
