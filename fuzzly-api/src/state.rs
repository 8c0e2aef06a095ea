//! Axum router state (§6): wraps [`AuthState`] plus the handful of
//! HTTP-boundary concerns that depend on the deployment `ENVIRONMENT`
//! (cookie `Secure` flag) rather than on any auth invariant.

use std::sync::Arc;

use fuzzly_auth::{token_registry::TokenMetadata, AuthState};
use fuzzly_db::AuthDb;
use fuzzly_kv::Kv;

/// `ENVIRONMENT ∈ {local, dev, prod, test}` (§6). Only the bits this crate
/// cares about are modeled here — CDN host selection belongs to the wider
/// application, out of scope for the auth subsystem.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Environment {
    Local,
    Dev,
    Prod,
    Test,
}

impl Environment {
    pub fn from_env_var(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Prod,
            "dev" | "development" => Self::Dev,
            "test" => Self::Test,
            _ => Self::Local,
        }
    }

    /// Whether the `kh-auth` cookie should carry `Secure` (§6: "secure/
    /// httponly off in local env"). `test` also runs without TLS.
    pub fn secure_cookies(self) -> bool {
        !matches!(self, Self::Local | Self::Test)
    }
}

pub struct ApiState<D: AuthDb, K: Kv<TokenMetadata>> {
    pub auth: Arc<AuthState<D, K>>,
    pub environment: Environment,
}

impl<D: AuthDb, K: Kv<TokenMetadata>> ApiState<D, K> {
    pub fn new(auth: Arc<AuthState<D, K>>, environment: Environment) -> Self {
        Self { auth, environment }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unrecognized_environment_defaults_to_local() {
        assert_eq!(Environment::from_env_var("staging"), Environment::Local);
        assert!(!Environment::from_env_var("staging").secure_cookies());
    }

    #[test]
    fn prod_and_dev_use_secure_cookies() {
        assert!(Environment::from_env_var("prod").secure_cookies());
        assert!(Environment::from_env_var("dev").secure_cookies());
    }

    #[test]
    fn local_and_test_omit_secure_cookies() {
        assert!(!Environment::from_env_var("local").secure_cookies());
        assert!(!Environment::from_env_var("test").secure_cookies());
    }
}
