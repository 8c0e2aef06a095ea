//! C6: `OtpStore` — TOTP enrollment, envelope encryption of the TOTP secret,
//! and single-use recovery codes (§4.5).

use std::sync::Arc;

use fuzzly_crypto::{
    aes::AesKey,
    password::{self, Argon2Params},
    rng::Crng,
};
use fuzzly_db::{
    models::{OtpRecordRow, OtpRecoveryCodeRow},
    AuthDb, DbError,
};
use totp_rs::{Algorithm, TOTP};
use tracing::error;
use uuid::Uuid;

use fuzzly_api_core::error::AuthError;

use crate::secret_store::SecretStore;

/// Number of recovery codes minted per enrollment (§4.5 step 4: "16
/// `OtpRecoveryCode` rows"), one per possible `key_id` nibble value.
const RECOVERY_CODE_COUNT: usize = 16;

fn totp(secret: &[u8]) -> Result<TOTP, AuthError> {
    TOTP::new(Algorithm::SHA1, 6, 1, 30, secret.to_vec()).map_err(|e| {
        let refid = Uuid::new_v4().to_string();
        error!(%refid, error = %e, "failed to construct TOTP instance");
        AuthError::internal(refid)
    })
}

fn check_totp(secret: &[u8], code: &str) -> Result<bool, AuthError> {
    let instance = totp(secret)?;
    instance.check_current(code).map_err(|e| {
        let refid = Uuid::new_v4().to_string();
        error!(%refid, error = %e, "failed to check current TOTP code");
        AuthError::internal(refid)
    })
}

/// A successfully-verified recovery code whose row must be deleted once the
/// rest of the login flow has completed (§4.5: "single use" is only
/// finalized after all other checks pass).
pub struct PendingRecoveryDeletion {
    pub user_id: i64,
    pub key_id: i16,
}

pub struct OtpStore<D: AuthDb> {
    db: Arc<D>,
    secrets: Arc<SecretStore>,
    argon2: Argon2Params,
}

impl<D: AuthDb> OtpStore<D> {
    pub fn new(db: Arc<D>, secrets: Arc<SecretStore>, argon2: Argon2Params) -> Self {
        Self { db, secrets, argon2 }
    }

    fn internal(e: DbError) -> AuthError {
        let refid = Uuid::new_v4().to_string();
        error!(%refid, error = %e, "otp store database error");
        AuthError::internal(refid)
    }

    /// Enroll `user_id`/`email` with `otp_secret`, gated by a fresh TOTP
    /// `otp_code` proving the client captured the secret correctly. Returns
    /// the 16 plaintext recovery codes, shown to the user exactly once.
    pub async fn add(
        &self,
        rng: &mut dyn Crng,
        user_id: i64,
        email: &str,
        email_hash: &[u8],
        otp_secret: &[u8],
        otp_code: &str,
    ) -> Result<Vec<String>, AuthError> {
        if !check_totp(otp_secret, otp_code)? {
            return Err(AuthError::bad_request("invalid code"));
        }

        let login = self.db.fetch_login_by_email_hash(email_hash).await.map_err(|e| match e {
            DbError::NotFound => AuthError::bad_request("invalid code"),
            other => Self::internal(other),
        })?;
        if login.user_id != user_id {
            return Err(AuthError::bad_request("invalid code"));
        }

        let key_secret_index = self.secrets.random_index(rng);
        let k = fuzzly_sha256::digest_many(&[email.as_bytes(), self.secrets.get(key_secret_index)]);
        let key_bytes: &[u8; 32] = k.as_ref();
        let aes_key = AesKey::new(key_bytes);
        let nonce = AesKey::generate_nonce(rng).map_err(|e| {
            let refid = Uuid::new_v4().to_string();
            error!(%refid, error = %e, "failed to generate otp nonce");
            AuthError::internal(refid)
        })?;
        let ciphertext = aes_key
            .encrypt(nonce, self.secrets.get(key_secret_index), otp_secret)
            .map_err(|e| {
                let refid = Uuid::new_v4().to_string();
                error!(%refid, error = %e, "failed to encrypt otp secret");
                AuthError::internal(refid)
            })?;

        let otp_record = OtpRecordRow {
            user_id,
            secret_index: key_secret_index as i16,
            nonce: nonce.to_vec(),
            ciphertext,
        };

        let mut plaintext_codes = Vec::with_capacity(RECOVERY_CODE_COUNT);
        let mut rows = Vec::with_capacity(RECOVERY_CODE_COUNT);
        for key_id in 0..RECOVERY_CODE_COUNT {
            let mut code_bytes = [0u8; 6];
            rng.try_fill_bytes(&mut code_bytes).map_err(|e| {
                let refid = Uuid::new_v4().to_string();
                error!(%refid, error = ?e, "failed to generate recovery code entropy");
                AuthError::internal(refid)
            })?;
            code_bytes[0] = (code_bytes[0] & 0xf0) | (key_id as u8 & 0x0f);
            let code_hex = fuzzly_hex::encode(&code_bytes);

            let code_secret_index = self.secrets.random_index(rng);
            let hashed = password::hash(
                rng,
                self.argon2,
                code_hex.as_bytes(),
                self.secrets.get(code_secret_index),
            )
            .map_err(|e| {
                let refid = Uuid::new_v4().to_string();
                error!(%refid, error = %e, "failed to hash recovery code");
                AuthError::internal(refid)
            })?;

            rows.push(OtpRecoveryCodeRow {
                user_id,
                key_id: key_id as i16,
                secret_index: code_secret_index as i16,
                recovery_key: hashed,
            });
            plaintext_codes.push(code_hex);
        }

        self.db.insert_otp_enrollment(otp_record, rows).await.map_err(Self::internal)?;
        Ok(plaintext_codes)
    }

    /// Verify `otp_code` at login time against an enrolled `otp`. A 6-digit
    /// code is checked as TOTP; anything else is checked as a recovery code
    /// (§4.5). Returns `Ok(None)` for a verified TOTP code (nothing
    /// deferred) or `Ok(Some(..))` for a verified recovery code, whose
    /// deletion the caller must finalize via [`Self::consume_recovery_code`]
    /// only after every other login check passes.
    pub async fn verify_at_login(
        &self,
        user_id: i64,
        email: &str,
        otp: &OtpRecordRow,
        otp_code: &str,
    ) -> Result<Option<PendingRecoveryDeletion>, AuthError> {
        if otp_code.len() == 6 && otp_code.bytes().all(|b| b.is_ascii_digit()) {
            let secret = self.decrypt_secret(email, otp)?;
            if check_totp(&secret, otp_code)? {
                Ok(None)
            } else {
                Err(AuthError::failed_login())
            }
        } else {
            let code_bytes = fuzzly_hex::decode(otp_code)
                .map_err(|_| AuthError::failed_login())?;
            let key_id = *code_bytes.first().ok_or_else(AuthError::failed_login)? & 0x0f;

            let row = self
                .db
                .fetch_recovery_code(user_id, key_id as i16)
                .await
                .map_err(|e| match e {
                    DbError::NotFound => AuthError::failed_login(),
                    other => Self::internal(other),
                })?;

            if row.secret_index < 0 || row.secret_index as usize >= self.secrets.len() {
                return Err(AuthError::failed_login());
            }
            let pepper = self.secrets.get(row.secret_index as usize).to_vec();
            let recovery_key = row.recovery_key.clone();
            let otp_code_owned = otp_code.to_owned();
            let matches = tokio::task::spawn_blocking(move || {
                password::verify(&recovery_key, otp_code_owned.as_bytes(), &pepper)
            })
            .await
            .map_err(|e| {
                let refid = Uuid::new_v4().to_string();
                error!(%refid, error = %e, "recovery code verification worker task panicked");
                AuthError::internal(refid)
            })?
            .map_err(|e| {
                let refid = Uuid::new_v4().to_string();
                error!(%refid, error = %e, "failed to verify recovery code hash");
                AuthError::internal(refid)
            })?;
            if !matches {
                return Err(AuthError::failed_login());
            }

            Ok(Some(PendingRecoveryDeletion { user_id, key_id: key_id as i16 }))
        }
    }

    /// Finalize single-use consumption of a recovery code, after the rest of
    /// the login has succeeded.
    pub async fn consume_recovery_code(
        &self,
        pending: PendingRecoveryDeletion,
    ) -> Result<(), AuthError> {
        self.db
            .delete_recovery_code(pending.user_id, pending.key_id)
            .await
            .map_err(Self::internal)
    }

    fn decrypt_secret(&self, email: &str, otp: &OtpRecordRow) -> Result<Vec<u8>, AuthError> {
        if otp.secret_index < 0 || otp.secret_index as usize >= self.secrets.len() {
            let refid = Uuid::new_v4().to_string();
            error!(%refid, "otp record has out-of-range secret_index");
            return Err(AuthError::internal(refid));
        }
        let pepper = self.secrets.get(otp.secret_index as usize);
        let k = fuzzly_sha256::digest_many(&[email.as_bytes(), pepper]);
        let key_bytes: &[u8; 32] = k.as_ref();
        let aes_key = AesKey::new(key_bytes);

        let nonce: [u8; 12] = otp.nonce.as_slice().try_into().map_err(|_| {
            let refid = Uuid::new_v4().to_string();
            error!(%refid, "otp record has malformed nonce length");
            AuthError::internal(refid)
        })?;
        aes_key.decrypt(nonce, pepper, &otp.ciphertext).map_err(|e| {
            let refid = Uuid::new_v4().to_string();
            error!(%refid, error = %e, "failed to decrypt otp secret");
            AuthError::internal(refid)
        })
    }

    /// Remove `user_id`'s OTP enrollment. The caller (`Authenticator`) is
    /// responsible for proving authorization first, either via a verified
    /// TOTP/recovery code or a `remove-otp` purpose token (§4.5 "Remove").
    /// Used/unused recovery codes from the removed enrollment are left in
    /// place.
    pub async fn remove(&self, user_id: i64) -> Result<(), AuthError> {
        self.db.delete_otp_record(user_id).await.map_err(Self::internal)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use fuzzly_crypto::rng::SysRng;
    use fuzzly_db::mem::MemDb;
    use totp_rs::{Algorithm, TOTP};

    use super::*;

    const EMAIL: &str = "alice@example.com";

    fn store(db: Arc<MemDb>) -> OtpStore<MemDb> {
        let secrets =
            Arc::new(SecretStore::new(vec![b"pepper-0".to_vec(), b"pepper-1".to_vec()]).unwrap());
        OtpStore::new(db, secrets, Argon2Params::default())
    }

    fn seeded_user(db: &MemDb) -> (i64, Vec<u8>) {
        let email_hash = fuzzly_sha256::digest(EMAIL.as_bytes()).as_ref().to_vec();
        let user_id =
            db.seed_user(email_hash.clone(), "hash".to_owned(), 0, "alice".to_owned(), None, false);
        (user_id, email_hash)
    }

    #[tokio::test]
    async fn enroll_then_verify_totp_succeeds() {
        let db = Arc::new(MemDb::new());
        let (user_id, email_hash) = seeded_user(&db);
        let store = store(db.clone());
        let mut rng = SysRng::new();

        let otp_secret = b"JBSWY3DPEHPK3PXP12345678".to_vec();
        let totp = TOTP::new(Algorithm::SHA1, 6, 1, 30, otp_secret.clone()).unwrap();
        let code = totp.generate_current().unwrap();

        let codes = store
            .add(&mut rng, user_id, EMAIL, &email_hash, &otp_secret, &code)
            .await
            .unwrap();
        assert_eq!(codes.len(), RECOVERY_CODE_COUNT);

        let login = db.fetch_login_by_email_hash(&email_hash).await.unwrap();
        let otp_row = login.otp.unwrap();

        let login_code = totp.generate_current().unwrap();
        let outcome =
            store.verify_at_login(user_id, EMAIL, &otp_row, &login_code).await.unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn recovery_code_is_single_use() {
        let db = Arc::new(MemDb::new());
        let (user_id, email_hash) = seeded_user(&db);
        let store = store(db.clone());
        let mut rng = SysRng::new();

        let otp_secret = b"JBSWY3DPEHPK3PXP12345678".to_vec();
        let totp = TOTP::new(Algorithm::SHA1, 6, 1, 30, otp_secret.clone()).unwrap();
        let code = totp.generate_current().unwrap();
        let codes = store
            .add(&mut rng, user_id, EMAIL, &email_hash, &otp_secret, &code)
            .await
            .unwrap();

        let login = db.fetch_login_by_email_hash(&email_hash).await.unwrap();
        let otp_row = login.otp.unwrap();

        let recovery_code = &codes[0];
        let pending = store
            .verify_at_login(user_id, EMAIL, &otp_row, recovery_code)
            .await
            .unwrap()
            .expect("recovery code should defer a deletion");
        store.consume_recovery_code(pending).await.unwrap();

        let err =
            store.verify_at_login(user_id, EMAIL, &otp_row, recovery_code).await.unwrap_err();
        assert_eq!(err.kind, fuzzly_api_core::error::AuthErrorKind::FailedLogin);
    }

    #[tokio::test]
    async fn wrong_totp_code_fails_enrollment() {
        let db = Arc::new(MemDb::new());
        let (user_id, email_hash) = seeded_user(&db);
        let store = store(db);
        let mut rng = SysRng::new();

        let otp_secret = b"JBSWY3DPEHPK3PXP12345678".to_vec();
        let err = store
            .add(&mut rng, user_id, EMAIL, &email_hash, &otp_secret, "000000")
            .await
            .unwrap_err();
        assert_eq!(err.kind, fuzzly_api_core::error::AuthErrorKind::BadRequest);
    }
}
