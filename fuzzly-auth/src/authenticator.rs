//! C7: `Authenticator` — the login, password-change, bot-credential, and
//! user-creation state machines (§4.6), composing `SecretStore`, `KeyRing`
//! (via `TokenCodec`), `TokenRegistry`, `PasswordHasher`, and `OtpStore`.

use std::sync::{Arc, OnceLock};

use apache_avro::{types::Record, Schema};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use fuzzly_crypto::rng::Crng;
use fuzzly_db::{AuthDb, DbError};
use fuzzly_kv::Kv;
use regex::Regex;
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use fuzzly_api_core::{
    dto::{LoginResponse, TokenResponse},
    error::AuthError,
};

use crate::{
    otp_store::OtpStore,
    password_hasher::PasswordHasher,
    scope::Scope,
    secret_store::SecretStore,
    token_codec::TokenCodec,
    token_registry::TokenMetadata,
};

const MIN_PASSWORD_LEN: usize = 10;
const BOT_TYPE_USER: i16 = 0;
const BOT_TYPE_INTERNAL: i16 = 1;

/// Domains whose mailboxes are granted admin scope outright (§4.6 step 6).
const ADMIN_DOMAINS: &[&str] = &["kheina.com", "fuzz.ly"];

const BOT_LOGIN_SCHEMA_JSON: &str = r#"{
    "type": "record",
    "name": "BotLogin",
    "fields": [
        {"name": "bot_id", "type": "long"},
        {"name": "user_id", "type": ["null", "long"], "default": null},
        {"name": "password", "type": "string"},
        {"name": "secret_index", "type": "int"}
    ]
}"#;

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}$").expect("static pattern is valid")
    })
}

fn is_valid_email(email: &str) -> bool {
    email_regex().is_match(email)
}

fn email_domain(email: &str) -> Option<&str> {
    email.rsplit_once('@').map(|(_, domain)| domain)
}

/// Resolves and parses the fixed Avro schema used to frame `BotLogin`
/// credential tokens (§4.6.1). `SchemaRepo` is an external collaborator in
/// the original system; this crate only needs to resolve its own writer
/// schema back from a fingerprint, so a single fixed-schema implementation
/// is provided here rather than a general registry client.
pub trait SchemaRepo: Send + Sync {
    fn write_schema(&self) -> &Schema;
    fn write_fingerprint(&self) -> [u8; 8];
    fn resolve(&self, fingerprint: [u8; 8]) -> Result<Schema, AuthError>;
}

pub struct BotLoginSchemaRepo {
    schema: Schema,
    fingerprint: [u8; 8],
}

impl BotLoginSchemaRepo {
    pub fn new() -> Self {
        let schema =
            Schema::parse_str(BOT_LOGIN_SCHEMA_JSON).expect("static schema is valid");
        let digest = fuzzly_sha256::digest(BOT_LOGIN_SCHEMA_JSON.as_bytes());
        let bytes: &[u8; 32] = digest.as_ref();
        let mut fingerprint = [0u8; 8];
        fingerprint.copy_from_slice(&bytes[..8]);
        Self { schema, fingerprint }
    }
}

impl Default for BotLoginSchemaRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRepo for BotLoginSchemaRepo {
    fn write_schema(&self) -> &Schema {
        &self.schema
    }

    fn write_fingerprint(&self) -> [u8; 8] {
        self.fingerprint
    }

    fn resolve(&self, fingerprint: [u8; 8]) -> Result<Schema, AuthError> {
        if fingerprint == self.fingerprint {
            Ok(self.schema.clone())
        } else {
            Err(AuthError::bad_request("unknown schema fingerprint"))
        }
    }
}

struct BotLoginPayload {
    bot_id: i64,
    user_id: Option<i64>,
    password: String,
    secret_index: i16,
}

fn encode_bot_login(repo: &dyn SchemaRepo, payload: &BotLoginPayload) -> Result<String, AuthError> {
    let schema = repo.write_schema();
    let mut record = Record::new(schema).ok_or_else(|| {
        let refid = Uuid::new_v4().to_string();
        error!(%refid, "failed to build avro record for bot login schema");
        AuthError::internal(refid)
    })?;
    record.put("bot_id", payload.bot_id);
    record.put("user_id", payload.user_id);
    record.put("password", payload.password.clone());
    record.put("secret_index", payload.secret_index as i32);

    let avro_bytes = apache_avro::to_avro_datum(schema, apache_avro::types::Value::from(record)).map_err(|e| {
        let refid = Uuid::new_v4().to_string();
        error!(%refid, error = %e, "failed to encode avro bot login payload");
        AuthError::internal(refid)
    })?;

    let mut framed = Vec::with_capacity(8 + avro_bytes.len());
    framed.extend_from_slice(&repo.write_fingerprint());
    framed.extend_from_slice(&avro_bytes);
    Ok(URL_SAFE_NO_PAD.encode(framed))
}

fn decode_bot_login(repo: &dyn SchemaRepo, token: &str) -> Result<BotLoginPayload, AuthError> {
    let framed = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| AuthError::bad_request("malformed bot token"))?;
    if framed.len() < 8 {
        return Err(AuthError::bad_request("malformed bot token"));
    }
    let mut fingerprint = [0u8; 8];
    fingerprint.copy_from_slice(&framed[..8]);
    let schema = repo.resolve(fingerprint)?;

    let mut reader = &framed[8..];
    let value = apache_avro::from_avro_datum(&schema, &mut reader, None)
        .map_err(|_| AuthError::bad_request("malformed bot token"))?;

    let apache_avro::types::Value::Record(fields) = value else {
        return Err(AuthError::bad_request("malformed bot token"));
    };
    let mut bot_id = None;
    let mut user_id = None;
    let mut password = None;
    let mut secret_index = None;
    for (name, field_value) in fields {
        match (name.as_str(), field_value) {
            ("bot_id", apache_avro::types::Value::Long(v)) => bot_id = Some(v),
            ("user_id", apache_avro::types::Value::Union(_, inner)) => {
                if let apache_avro::types::Value::Long(v) = *inner {
                    user_id = Some(v);
                }
            }
            ("password", apache_avro::types::Value::String(v)) => password = Some(v),
            ("secret_index", apache_avro::types::Value::Int(v)) => secret_index = Some(v as i16),
            _ => {}
        }
    }

    Ok(BotLoginPayload {
        bot_id: bot_id.ok_or_else(|| AuthError::bad_request("malformed bot token"))?,
        user_id,
        password: password.ok_or_else(|| AuthError::bad_request("malformed bot token"))?,
        secret_index: secret_index.ok_or_else(|| AuthError::bad_request("malformed bot token"))?,
    })
}

pub struct Authenticator<D: AuthDb, K: Kv<TokenMetadata>> {
    db: Arc<D>,
    secrets: Arc<SecretStore>,
    codec: Arc<TokenCodec<D, K>>,
    hasher: Arc<PasswordHasher>,
    otp: Arc<OtpStore<D>>,
    schema_repo: Arc<dyn SchemaRepo>,
}

impl<D: AuthDb, K: Kv<TokenMetadata>> Authenticator<D, K> {
    pub fn new(
        db: Arc<D>,
        secrets: Arc<SecretStore>,
        codec: Arc<TokenCodec<D, K>>,
        hasher: Arc<PasswordHasher>,
        otp: Arc<OtpStore<D>>,
        schema_repo: Arc<dyn SchemaRepo>,
    ) -> Self {
        Self { db, secrets, codec, hasher, otp, schema_repo }
    }

    fn internal(e: DbError) -> AuthError {
        let refid = Uuid::new_v4().to_string();
        error!(%refid, error = %e, "authenticator database error");
        AuthError::internal(refid)
    }

    /// The codec backing this authenticator, for callers (`AccountFlow`)
    /// that need to issue/decode purpose tokens directly.
    pub fn codec(&self) -> &Arc<TokenCodec<D, K>> {
        &self.codec
    }

    fn email_hash(email: &str, secrets: &SecretStore) -> Vec<u8> {
        fuzzly_sha256::digest3_many(&[email.as_bytes(), secrets.get(0)]).as_ref().to_vec()
    }

    fn assign_scope(&self, email: &str, is_mod: bool) -> Scope {
        if let Some(domain) = email_domain(email) {
            if ADMIN_DOMAINS.iter().any(|d| d.eq_ignore_ascii_case(domain)) {
                return Scope::Admin;
            }
        }
        if is_mod {
            Scope::Mod
        } else {
            Scope::User
        }
    }

    /// §4.6 "Login".
    pub async fn login(
        &self,
        rng: &mut dyn Crng,
        now: DateTime<Utc>,
        email: &str,
        password: &str,
        otp_code: Option<&str>,
        ip: Option<&str>,
        fp: Option<&str>,
    ) -> Result<LoginResponse, AuthError> {
        if !is_valid_email(email) || password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::bad_request("invalid email or password"));
        }

        let email_hash = Self::email_hash(email, &self.secrets);
        let login = self.db.fetch_login_by_email_hash(&email_hash).await.map_err(|e| match e {
            DbError::NotFound => AuthError::failed_login(),
            other => Self::internal(other),
        })?;

        let mut pending_recovery_deletion = None;
        if let Some(otp) = &login.otp {
            let code = otp_code.unwrap_or("");
            if code.is_empty() {
                return Err(AuthError::unprocessable_entity("missing otp key"));
            }
            let outcome = self.otp.verify_at_login(login.user_id, email, otp, code).await?;
            pending_recovery_deletion = outcome;
        }

        let verified = self.hasher.verify(&self.secrets, &login.password, password, login.secret_index).await?;
        if !verified {
            return Err(AuthError::failed_login());
        }
        if self.hasher.needs_rehash(&login.password) {
            let (rehashed, index) = self.hasher.hash(rng, &self.secrets, password).await?;
            self.db
                .update_password(login.user_id, &rehashed, index)
                .await
                .map_err(Self::internal)?;
        }

        let scope = self.assign_scope(email, login.is_mod);

        if let Some(pending) = pending_recovery_deletion.take() {
            self.otp.consume_recovery_code(pending).await?;
        }

        let claims = json!({
            "scope": scope.all_included_scopes().into_iter().map(Scope::as_str).collect::<Vec<_>>(),
            "ip": ip,
            "fp": fp,
            "email": email,
        });
        let token = self.codec.issue(now, login.user_id, claims, None).await?;

        Ok(LoginResponse {
            user_id: login.user_id,
            handle: login.handle,
            name: login.name,
            is_mod: login.is_mod,
            token,
        })
    }

    /// §4.6 "Password change".
    pub async fn change_password(
        &self,
        rng: &mut dyn Crng,
        email: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        if new_password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::bad_request("new password is too short"));
        }
        let email_hash = Self::email_hash(email, &self.secrets);
        let login = self.db.fetch_login_by_email_hash(&email_hash).await.map_err(|e| match e {
            DbError::NotFound => AuthError::failed_login(),
            other => Self::internal(other),
        })?;

        let verified =
            self.hasher.verify(&self.secrets, &login.password, old_password, login.secret_index).await?;
        if !verified {
            return Err(AuthError::failed_login());
        }

        let (hashed, index) = self.hasher.hash(rng, &self.secrets, new_password).await?;
        self.db.update_password(login.user_id, &hashed, index).await.map_err(Self::internal)
    }

    /// §4.6 "User create": insert `users`/`auth.user_login` atomically and
    /// issue a session token for the new account.
    pub async fn create_user(
        &self,
        rng: &mut dyn Crng,
        now: DateTime<Utc>,
        handle: &str,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<(i64, TokenResponse), AuthError> {
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::bad_request("password is too short"));
        }
        let email_hash = Self::email_hash(email, &self.secrets);
        let (hashed, index) = self.hasher.hash(rng, &self.secrets, password).await?;

        let user_id = self
            .db
            .insert_user(handle, name, &email_hash, &hashed, index)
            .await
            .map_err(|e| match e {
                DbError::Conflict(field) => AuthError::conflict(field),
                other => Self::internal(other),
            })?;

        let claims = json!({
            "scope": Scope::User.all_included_scopes().into_iter().map(Scope::as_str).collect::<Vec<_>>(),
            "email": email,
        });
        let token = self.codec.issue(now, user_id, claims, None).await?;
        Ok((user_id, token))
    }

    /// §4.6 "Purpose tokens": short- or default-lived tokens whose `key`
    /// claim discriminates the `AccountFlow` step they authorize.
    pub async fn issue_purpose_token(
        &self,
        now: DateTime<Utc>,
        key: &str,
        email: &str,
        ttl: Duration,
    ) -> Result<TokenResponse, AuthError> {
        let claims = json!({ "key": key, "email": email });
        self.codec.issue(now, 0, claims, Some(ttl)).await
    }

    /// §4.6 "Bot create": mint a random bot password, Argon2-hash it, and
    /// return an Avro-framed credential for offline distribution.
    pub async fn bot_create(
        &self,
        rng: &mut dyn Crng,
        user_id: Option<i64>,
        is_internal: bool,
        created_by: Option<i64>,
    ) -> Result<String, AuthError> {
        let mut password_bytes = [0u8; 64];
        rng.try_fill_bytes(&mut password_bytes).map_err(|e| {
            let refid = Uuid::new_v4().to_string();
            error!(%refid, error = ?e, "failed to generate bot password entropy");
            AuthError::internal(refid)
        })?;
        let password_hex = fuzzly_hex::encode(&password_bytes);

        let (hashed, index) = self.hasher.hash(rng, &self.secrets, &password_hex).await?;
        let bot_type_id = if is_internal { BOT_TYPE_INTERNAL } else { BOT_TYPE_USER };
        let row = self
            .db
            .upsert_bot_login(user_id, &hashed, index, bot_type_id, created_by)
            .await
            .map_err(Self::internal)?;

        encode_bot_login(
            self.schema_repo.as_ref(),
            &BotLoginPayload {
                bot_id: row.bot_id,
                user_id: row.user_id,
                password: password_hex,
                secret_index: index,
            },
        )
    }

    /// §4.6 "Bot login": decode the Avro-framed credential, verify the
    /// embedded password, and issue a `bot`- or `internal`-scoped token.
    pub async fn bot_login(
        &self,
        rng: &mut dyn Crng,
        now: DateTime<Utc>,
        token: &str,
    ) -> Result<TokenResponse, AuthError> {
        let payload = decode_bot_login(self.schema_repo.as_ref(), token)?;

        let row = self.db.fetch_bot_login(payload.bot_id).await.map_err(|e| match e {
            DbError::NotFound => AuthError::failed_login(),
            other => Self::internal(other),
        })?;
        if row.user_id != payload.user_id {
            return Err(AuthError::failed_login());
        }

        let verified =
            self.hasher.verify(&self.secrets, &row.password, &payload.password, row.secret_index).await?;
        if !verified {
            return Err(AuthError::failed_login());
        }
        if self.hasher.needs_rehash(&row.password) {
            let (rehashed, index) = self.hasher.hash(rng, &self.secrets, &payload.password).await?;
            self.db
                .update_bot_password(row.bot_id, &rehashed, index)
                .await
                .map_err(Self::internal)?;
        }

        let scope = if row.bot_type_id == BOT_TYPE_INTERNAL { Scope::Internal } else { Scope::Bot };
        let claims: Value = json!({ "scope": scope.all_included_scopes().into_iter().map(Scope::as_str).collect::<Vec<_>>() });
        self.codec.issue(now, row.user_id.unwrap_or(0), claims, None).await
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;
    use fuzzly_crypto::{password::Argon2Params, rng::SysRng};
    use fuzzly_db::mem::MemDb;
    use fuzzly_kv::mem::MemKv;

    use super::*;
    use crate::key_ring::KeyRing;
    use crate::token_registry::TokenRegistry;

    fn authenticator() -> Authenticator<MemDb, MemKv> {
        let db = Arc::new(MemDb::new());
        let secrets =
            Arc::new(SecretStore::new(vec![b"pepper-0".to_vec(), b"pepper-1".to_vec()]).unwrap());
        let key_ring = Arc::new(KeyRing::new(db.clone()));
        let registry = Arc::new(TokenRegistry::new(Arc::new(MemKv::new())));
        let codec = Arc::new(TokenCodec::new(key_ring, registry));
        let hasher = Arc::new(PasswordHasher::new(Argon2Params::default()));
        let otp = Arc::new(OtpStore::new(db.clone(), secrets.clone(), Argon2Params::default()));
        Authenticator::new(db, secrets, codec, hasher, otp, Arc::new(BotLoginSchemaRepo::new()))
    }

    #[tokio::test]
    async fn create_user_then_login_succeeds() {
        let auth = authenticator();
        let mut rng = SysRng::new();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        let (user_id, _token) = auth
            .create_user(&mut rng, now, "alice", "Alice", "alice@example.com", "correcthorsebattery")
            .await
            .unwrap();

        let response = auth
            .login(
                &mut rng,
                now,
                "alice@example.com",
                "correcthorsebattery",
                None,
                Some("127.0.0.1"),
                None,
            )
            .await
            .unwrap();
        assert_eq!(response.user_id, user_id);
        assert_eq!(response.handle, "alice");
    }

    #[tokio::test]
    async fn login_with_wrong_password_fails() {
        let auth = authenticator();
        let mut rng = SysRng::new();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        auth.create_user(&mut rng, now, "alice", "Alice", "alice@example.com", "correcthorsebattery")
            .await
            .unwrap();

        let err = auth
            .login(&mut rng, now, "alice@example.com", "wrongpassword", None, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, fuzzly_api_core::error::AuthErrorKind::FailedLogin);
    }

    #[tokio::test]
    async fn admin_domain_grants_admin_scope() {
        let auth = authenticator();
        let mut rng = SysRng::new();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        auth.create_user(&mut rng, now, "bob", "Bob", "bob@fuzz.ly", "correcthorsebattery")
            .await
            .unwrap();

        let response = auth
            .login(&mut rng, now, "bob@fuzz.ly", "correcthorsebattery", None, None, None)
            .await
            .unwrap();
        let decoded = auth.codec.decode(now, &response.token.token).await.unwrap();
        assert!(decoded.scope().contains(&"admin".to_owned()));
    }

    #[tokio::test]
    async fn bot_create_then_login_round_trips() {
        let auth = authenticator();
        let mut rng = SysRng::new();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        let bot_token = auth.bot_create(&mut rng, None, false, None).await.unwrap();
        let issued = auth.bot_login(&mut rng, now, &bot_token).await.unwrap();
        let decoded = auth.codec.decode(now, &issued.token).await.unwrap();
        assert!(decoded.scope().contains(&"bot".to_owned()));
    }

    #[tokio::test]
    async fn invalid_email_format_is_rejected() {
        let auth = authenticator();
        let mut rng = SysRng::new();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let err = auth
            .login(&mut rng, now, "not-an-email", "correcthorsebattery", None, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, fuzzly_api_core::error::AuthErrorKind::BadRequest);
    }
}
