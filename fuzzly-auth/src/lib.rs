//! The authentication and session subsystem (C1-C10): asymmetrically-signed
//! bearer tokens, password-and-OTP login with recovery codes, bot
//! credentials, key lifecycle, and the request-path gate that enforces all
//! of it. Every component is generic over the [`fuzzly_db::AuthDb`] /
//! [`fuzzly_kv::Kv`] traits so it can run against the Postgres/Redis-backed
//! implementations in production and the in-memory fakes in tests.

pub mod account_flow;
pub mod authenticator;
pub mod ban_registry;
pub mod identity;
pub mod key_ring;
pub mod mailer;
pub mod otp_store;
pub mod password_hasher;
pub mod scope;
pub mod secret_store;
pub mod token_codec;
pub mod token_registry;

use std::sync::Arc;

use fuzzly_crypto::password::Argon2Params;
use fuzzly_db::AuthDb;
use fuzzly_kv::Kv;

use account_flow::{AccountFlow, NoopTagRepo, TagRepo};
use authenticator::{Authenticator, BotLoginSchemaRepo, SchemaRepo};
use ban_registry::BanRegistry;
use identity::RequestGate;
use key_ring::KeyRing;
use mailer::{LoggingMailer, Mailer};
use otp_store::OtpStore;
use password_hasher::PasswordHasher;
use secret_store::SecretStore;
use token_codec::TokenCodec;
use token_registry::{TokenMetadata, TokenRegistry};

/// Every component of the auth subsystem, bundled for use as axum router
/// state. Construction wires the dependency graph once at bootstrap; the
/// rest of the process only ever sees `Arc<AuthState<D, K>>`.
pub struct AuthState<D: AuthDb, K: Kv<TokenMetadata>> {
    pub secrets: Arc<SecretStore>,
    pub key_ring: Arc<KeyRing<D>>,
    pub codec: Arc<TokenCodec<D, K>>,
    pub registry: Arc<TokenRegistry<K>>,
    pub hasher: Arc<PasswordHasher>,
    pub otp: Arc<OtpStore<D>>,
    pub authenticator: Arc<Authenticator<D, K>>,
    pub bans: Arc<BanRegistry<D>>,
    pub gate: Arc<RequestGate<D, K>>,
    pub account_flow: Arc<AccountFlow<D, K>>,
}

/// Construction-time knobs that aren't derivable from `D`/`K` themselves.
pub struct AuthStateConfig {
    pub secrets: Vec<Vec<u8>>,
    pub argon2: Argon2Params,
    pub ip_salt: Vec<u8>,
    pub openapi_path: String,
}

impl<D: AuthDb, K: Kv<TokenMetadata>> AuthState<D, K> {
    /// Wires the full dependency graph with default collaborators
    /// ([`BotLoginSchemaRepo`], [`LoggingMailer`], [`NoopTagRepo`]) — the
    /// combination used locally and in tests. Production bootstrap
    /// (`fuzzly-authd`) calls [`Self::with_collaborators`] with a real
    /// `Mailer`/`TagRepo` instead.
    pub fn new(db: Arc<D>, kv: Arc<K>, config: AuthStateConfig) -> Result<Self, secret_store::Error> {
        Self::with_collaborators(
            db,
            kv,
            config,
            Arc::new(BotLoginSchemaRepo::new()),
            Arc::new(LoggingMailer),
            Arc::new(NoopTagRepo),
        )
    }

    pub fn with_collaborators(
        db: Arc<D>,
        kv: Arc<K>,
        config: AuthStateConfig,
        schema_repo: Arc<dyn SchemaRepo>,
        mailer: Arc<dyn Mailer>,
        tags: Arc<dyn TagRepo>,
    ) -> Result<Self, secret_store::Error> {
        let secrets = Arc::new(SecretStore::new(config.secrets)?);
        let key_ring = Arc::new(KeyRing::new(db.clone()));
        let registry = Arc::new(TokenRegistry::new(kv));
        let codec = Arc::new(TokenCodec::new(key_ring.clone(), registry.clone()));
        let hasher = Arc::new(PasswordHasher::new(config.argon2));
        let otp = Arc::new(OtpStore::new(db.clone(), secrets.clone(), config.argon2));
        let authenticator = Arc::new(Authenticator::new(
            db.clone(),
            secrets.clone(),
            codec.clone(),
            hasher.clone(),
            otp.clone(),
            schema_repo,
        ));
        let bans = Arc::new(BanRegistry::new(db, config.ip_salt));
        let gate = Arc::new(RequestGate::new(codec.clone(), bans.clone(), config.openapi_path));
        let account_flow = Arc::new(AccountFlow::new(authenticator.clone(), otp.clone(), mailer, tags));

        Ok(Self {
            secrets,
            key_ring,
            codec,
            registry,
            hasher,
            otp,
            authenticator,
            bans,
            gate,
            account_flow,
        })
    }
}
