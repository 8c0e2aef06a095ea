//! C10: `AccountFlow` — the email-gated account lifecycle (§4.10): account
//! creation, password recovery, and OTP add/remove, all built on top of
//! [`Authenticator`]'s purpose tokens (§4.6) rather than duplicating its
//! login/credential logic.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use fuzzly_crypto::rng::Crng;
use fuzzly_db::AuthDb;
use fuzzly_kv::Kv;
use regex::Regex;

use fuzzly_api_core::{dto::LoginResponse, error::AuthError};

use crate::{
    authenticator::Authenticator,
    mailer::{self, MailMessage, Mailer},
    otp_store::OtpStore,
    token_registry::TokenMetadata,
};

const CREATE_ACCOUNT_TTL: Duration = Duration::seconds(900);
const RECOVER_PASSWORD_TTL: Duration = Duration::seconds(900);
const REMOVE_OTP_TTL: Duration = Duration::seconds(900);

const KEY_CREATE_ACCOUNT: &str = "create-account";
const KEY_RECOVER_ACCOUNT: &str = "recover-account";
const KEY_REMOVE_OTP: &str = "remove-otp";

fn handle_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_]{5,}$").expect("static pattern is valid"))
}

/// Inserts the two system tags created alongside a finalized account
/// (`{handle}_(artist)`, `{handle}_(subject)`). The tag graph lives outside
/// this subsystem, so `AccountFlow` only needs to invoke it once, fire-and-
/// verify, not own the tag data model.
#[async_trait]
pub trait TagRepo: Send + Sync {
    async fn create_system_tags(&self, handle: &str, tags: &[String]) -> Result<(), AuthError>;
}

pub struct NoopTagRepo;

#[async_trait]
impl TagRepo for NoopTagRepo {
    async fn create_system_tags(&self, _handle: &str, _tags: &[String]) -> Result<(), AuthError> {
        Ok(())
    }
}

pub struct AccountFlow<D: AuthDb, K: Kv<TokenMetadata>> {
    authenticator: Arc<Authenticator<D, K>>,
    otp: Arc<OtpStore<D>>,
    mailer: Arc<dyn Mailer>,
    tags: Arc<dyn TagRepo>,
}

impl<D: AuthDb, K: Kv<TokenMetadata>> AccountFlow<D, K> {
    pub fn new(
        authenticator: Arc<Authenticator<D, K>>,
        otp: Arc<OtpStore<D>>,
        mailer: Arc<dyn Mailer>,
        tags: Arc<dyn TagRepo>,
    ) -> Self {
        Self { authenticator, otp, mailer, tags }
    }

    fn purpose_from_token(
        token: &crate::token_codec::AuthToken,
        expected: &str,
    ) -> Result<(), AuthError> {
        match token.purpose() {
            Some(key) if key == expected => Ok(()),
            _ => Err(AuthError::bad_request("token does not authorize this action")),
        }
    }

    /// §4.10 "create_account": mint a 900s `create-account` purpose token
    /// and hand it to the mailer; never blocks on delivery.
    pub async fn create_account(
        &self,
        now: DateTime<Utc>,
        email: &str,
        name: &str,
    ) -> Result<(), AuthError> {
        let claims = serde_json::json!({ "key": KEY_CREATE_ACCOUNT, "name": name, "email": email });
        let token = self
            .authenticator
            .codec()
            .issue(now, 0, claims, Some(CREATE_ACCOUNT_TTL))
            .await?;

        mailer::dispatch(
            self.mailer.clone(),
            MailMessage::new(
                email,
                "Finish creating your account",
                format!("Click the link to finish creating your account: {}", token.token),
            ),
        );
        Ok(())
    }

    /// §4.10 "finalize_account": redeem a `create-account` purpose token,
    /// delegate to [`Authenticator::create_user`], then seed the two system
    /// tags for the new handle.
    pub async fn finalize_account(
        &self,
        rng: &mut dyn Crng,
        now: DateTime<Utc>,
        name: &str,
        handle: &str,
        password: &str,
        token: &str,
    ) -> Result<LoginResponse, AuthError> {
        if !handle_regex().is_match(handle) {
            return Err(AuthError::bad_request("invalid handle"));
        }

        let decoded = self.authenticator.codec().decode(now, token).await?;
        Self::purpose_from_token(&decoded, KEY_CREATE_ACCOUNT)?;
        let email = decoded
            .email()
            .ok_or_else(|| AuthError::bad_request("token is missing an email claim"))?;

        let (user_id, session_token) =
            self.authenticator.create_user(rng, now, handle, name, email, password).await?;

        let tags = vec![format!("{handle}_(artist)"), format!("{handle}_(subject)")];
        self.tags.create_system_tags(handle, &tags).await?;

        Ok(LoginResponse {
            user_id,
            handle: handle.to_owned(),
            name: Some(name.to_owned()),
            is_mod: false,
            token: session_token,
        })
    }

    /// §4.10 "recover_password": mint a 900s `recover-account` purpose token
    /// and email it.
    pub async fn recover_password(&self, now: DateTime<Utc>, email: &str) -> Result<(), AuthError> {
        let claims = serde_json::json!({ "key": KEY_RECOVER_ACCOUNT, "email": email });
        let token = self
            .authenticator
            .codec()
            .issue(now, 0, claims, Some(RECOVER_PASSWORD_TTL))
            .await?;

        mailer::dispatch(
            self.mailer.clone(),
            MailMessage::new(
                email,
                "Reset your password",
                format!("Click the link to reset your password: {}", token.token),
            ),
        );
        Ok(())
    }

    /// §4.5/§4.10 "request_remove_otp": mint a 900s `remove-otp` purpose
    /// token and email it.
    pub async fn request_remove_otp(&self, now: DateTime<Utc>, email: &str) -> Result<(), AuthError> {
        let claims = serde_json::json!({ "key": KEY_REMOVE_OTP, "email": email });
        let token = self
            .authenticator
            .codec()
            .issue(now, 0, claims, Some(REMOVE_OTP_TTL))
            .await?;

        mailer::dispatch(
            self.mailer.clone(),
            MailMessage::new(
                email,
                "Remove two-factor authentication",
                format!("Click the link to remove two-factor authentication: {}", token.token),
            ),
        );
        Ok(())
    }

    /// §4.5 "Remove": authorizes OTP removal either with a verified
    /// TOTP/recovery code or a `remove-otp` purpose token, then deletes the
    /// enrollment (used/unused recovery codes are left in place).
    pub async fn remove_otp(
        &self,
        now: DateTime<Utc>,
        user_id: i64,
        email: &str,
        otp: &fuzzly_db::models::OtpRecordRow,
        credential: RemoveOtpCredential<'_>,
    ) -> Result<(), AuthError> {
        match credential {
            RemoveOtpCredential::OtpCode(code) => {
                let pending = self.otp.verify_at_login(user_id, email, otp, code).await?;
                if let Some(pending) = pending {
                    self.otp.consume_recovery_code(pending).await?;
                }
            }
            RemoveOtpCredential::PurposeToken(token) => {
                let decoded = self.authenticator.codec().decode(now, token).await?;
                Self::purpose_from_token(&decoded, KEY_REMOVE_OTP)?;
                if decoded.email() != Some(email) {
                    return Err(AuthError::bad_request("token does not match this account"));
                }
            }
        }
        self.otp.remove(user_id).await
    }
}

/// Either path §4.5 accepts to authorize OTP removal.
pub enum RemoveOtpCredential<'a> {
    OtpCode(&'a str),
    PurposeToken(&'a str),
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use chrono::TimeZone;
    use fuzzly_crypto::{password::Argon2Params, rng::SysRng};
    use fuzzly_db::mem::MemDb;
    use fuzzly_kv::mem::MemKv;

    use super::*;
    use crate::{
        key_ring::KeyRing, mailer::LoggingMailer, password_hasher::PasswordHasher,
        secret_store::SecretStore, token_codec::TokenCodec, token_registry::TokenRegistry,
    };

    fn flow() -> AccountFlow<MemDb, MemKv> {
        let db = Arc::new(MemDb::new());
        let secrets =
            Arc::new(SecretStore::new(vec![b"pepper-0".to_vec(), b"pepper-1".to_vec()]).unwrap());
        let key_ring = Arc::new(KeyRing::new(db.clone()));
        let registry = Arc::new(TokenRegistry::new(Arc::new(MemKv::new())));
        let codec = Arc::new(TokenCodec::new(key_ring, registry));
        let hasher = Arc::new(PasswordHasher::new(Argon2Params::default()));
        let otp = Arc::new(OtpStore::new(db.clone(), secrets.clone(), Argon2Params::default()));
        let authenticator = Arc::new(Authenticator::new(
            db,
            secrets,
            codec,
            hasher,
            otp.clone(),
            Arc::new(crate::authenticator::BotLoginSchemaRepo::new()),
        ));
        AccountFlow::new(authenticator, otp, Arc::new(LoggingMailer), Arc::new(NoopTagRepo))
    }

    #[tokio::test]
    async fn create_then_finalize_account_round_trips() {
        let flow = flow();
        let mut rng = SysRng::new();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        flow.create_account(now, "alice@example.com", "Alice").await.unwrap();

        let purpose = flow
            .authenticator
            .issue_purpose_token(now, KEY_CREATE_ACCOUNT, "alice@example.com", CREATE_ACCOUNT_TTL)
            .await
            .unwrap();

        let response = flow
            .finalize_account(&mut rng, now, "Alice", "alice_handle", "correcthorsebattery", &purpose.token)
            .await
            .unwrap();
        assert_eq!(response.handle, "alice_handle");
    }

    #[tokio::test]
    async fn finalize_account_rejects_invalid_handle() {
        let flow = flow();
        let mut rng = SysRng::new();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let purpose = flow
            .authenticator
            .issue_purpose_token(now, KEY_CREATE_ACCOUNT, "alice@example.com", CREATE_ACCOUNT_TTL)
            .await
            .unwrap();

        let err = flow
            .finalize_account(&mut rng, now, "Alice", "ab", "correcthorsebattery", &purpose.token)
            .await
            .unwrap_err();
        assert_eq!(err.kind, fuzzly_api_core::error::AuthErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn finalize_account_rejects_wrong_purpose_token() {
        let flow = flow();
        let mut rng = SysRng::new();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let purpose = flow
            .authenticator
            .issue_purpose_token(now, KEY_RECOVER_ACCOUNT, "alice@example.com", RECOVER_PASSWORD_TTL)
            .await
            .unwrap();

        let err = flow
            .finalize_account(&mut rng, now, "Alice", "alice_handle", "correcthorsebattery", &purpose.token)
            .await
            .unwrap_err();
        assert_eq!(err.kind, fuzzly_api_core::error::AuthErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn recover_password_issues_purpose_token() {
        let flow = flow();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        flow.recover_password(now, "alice@example.com").await.unwrap();
    }
}
