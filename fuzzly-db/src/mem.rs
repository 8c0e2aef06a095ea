//! An in-memory [`AuthDb`] fake, used by `fuzzly-auth`'s tests so they run
//! without a live Postgres instance (§8.1).

use std::sync::{
    atomic::{AtomicI64, Ordering},
    Mutex,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    models::{
        BanRow, BotLoginRow, IpBanRow, LoginLookupRow, OtpRecordRow,
        OtpRecoveryCodeRow, SigningKeyRow,
    },
    AuthDb, DbError,
};

#[derive(Default)]
struct State {
    next_key_id: i64,
    next_user_id: i64,
    next_bot_id: i64,
    signing_keys: Vec<SigningKeyRow>,
    user_logins: Vec<LoginLookupRowInternal>,
    bot_logins: Vec<BotLoginRow>,
    recovery_codes: Vec<OtpRecoveryCodeRow>,
    bans: Vec<BanRow>,
    ip_bans: Vec<IpBanRow>,
}

#[derive(Clone)]
struct LoginLookupRowInternal {
    user_id: i64,
    email_hash: Vec<u8>,
    password: String,
    secret_index: i16,
    handle: String,
    name: Option<String>,
    is_mod: bool,
    otp: Option<OtpRecordRow>,
}

/// An in-memory, `Mutex`-guarded stand-in for a Postgres-backed [`AuthDb`].
pub struct MemDb {
    state: Mutex<State>,
    ban_id_counter: AtomicI64,
}

impl MemDb {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            ban_id_counter: AtomicI64::new(1),
        }
    }

    /// Test helper: register a user directly, bypassing `insert_user_login`,
    /// so tests can seed fixtures without also exercising account creation.
    pub fn seed_user(
        &self,
        email_hash: Vec<u8>,
        password: String,
        secret_index: i16,
        handle: String,
        name: Option<String>,
        is_mod: bool,
    ) -> i64 {
        let mut state = self.state.lock().unwrap();
        let user_id = state.next_user_id;
        state.next_user_id += 1;
        state.user_logins.push(LoginLookupRowInternal {
            user_id,
            email_hash,
            password,
            secret_index,
            handle,
            name,
            is_mod,
            otp: None,
        });
        user_id
    }

    pub fn seed_ban(&self, ban: BanRow) {
        self.state.lock().unwrap().bans.push(ban);
    }

    pub fn next_ban_id(&self) -> i64 {
        self.ban_id_counter.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for MemDb {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthDb for MemDb {
    async fn insert_signing_key(
        &self,
        algorithm: i16,
        public_key: &[u8],
        signature: &[u8],
        expires: DateTime<Utc>,
    ) -> Result<SigningKeyRow, DbError> {
        let mut state = self.state.lock().unwrap();
        let key_id = state.next_key_id;
        state.next_key_id += 1;
        let row = SigningKeyRow {
            key_id,
            algorithm,
            public_key: public_key.to_vec(),
            signature: signature.to_vec(),
            issued: Utc::now(),
            expires,
        };
        state.signing_keys.push(row.clone());
        Ok(row)
    }

    async fn fetch_signing_key(
        &self,
        algorithm: i16,
        key_id: i64,
    ) -> Result<SigningKeyRow, DbError> {
        let state = self.state.lock().unwrap();
        state
            .signing_keys
            .iter()
            .find(|k| k.algorithm == algorithm && k.key_id == key_id)
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn insert_user(
        &self,
        handle: &str,
        name: &str,
        email_hash: &[u8],
        password: &str,
        secret_index: i16,
    ) -> Result<i64, DbError> {
        let mut state = self.state.lock().unwrap();
        if state.user_logins.iter().any(|u| u.email_hash == email_hash) {
            return Err(DbError::Conflict("email_hash".to_owned()));
        }
        if state.user_logins.iter().any(|u| u.handle == handle) {
            return Err(DbError::Conflict("handle".to_owned()));
        }
        let user_id = state.next_user_id;
        state.next_user_id += 1;
        state.user_logins.push(LoginLookupRowInternal {
            user_id,
            email_hash: email_hash.to_vec(),
            password: password.to_owned(),
            secret_index,
            handle: handle.to_owned(),
            name: Some(name.to_owned()),
            is_mod: false,
            otp: None,
        });
        Ok(user_id)
    }

    async fn fetch_login_by_email_hash(
        &self,
        email_hash: &[u8],
    ) -> Result<LoginLookupRow, DbError> {
        let state = self.state.lock().unwrap();
        let row = state
            .user_logins
            .iter()
            .find(|u| u.email_hash == email_hash)
            .ok_or(DbError::NotFound)?;
        Ok(LoginLookupRow {
            user_id: row.user_id,
            password: row.password.clone(),
            secret_index: row.secret_index,
            handle: row.handle.clone(),
            name: row.name.clone(),
            is_mod: row.is_mod,
            otp: row.otp.clone(),
        })
    }

    async fn update_password(
        &self,
        user_id: i64,
        password: &str,
        secret_index: i16,
    ) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        let row = state
            .user_logins
            .iter_mut()
            .find(|u| u.user_id == user_id)
            .ok_or(DbError::NotFound)?;
        row.password = password.to_owned();
        row.secret_index = secret_index;
        Ok(())
    }

    async fn upsert_bot_login(
        &self,
        user_id: Option<i64>,
        password: &str,
        secret_index: i16,
        bot_type_id: i16,
        created_by: Option<i64>,
    ) -> Result<BotLoginRow, DbError> {
        let mut state = self.state.lock().unwrap();
        if let Some(uid) = user_id {
            if let Some(existing) =
                state.bot_logins.iter_mut().find(|b| b.user_id == Some(uid))
            {
                existing.password = password.to_owned();
                existing.secret_index = secret_index;
                return Ok(existing.clone());
            }
        }
        let bot_id = state.next_bot_id;
        state.next_bot_id += 1;
        let row = BotLoginRow {
            bot_id,
            user_id,
            password: password.to_owned(),
            secret_index,
            bot_type_id,
            created_by,
        };
        state.bot_logins.push(row.clone());
        Ok(row)
    }

    async fn fetch_bot_login(&self, bot_id: i64) -> Result<BotLoginRow, DbError> {
        let state = self.state.lock().unwrap();
        state
            .bot_logins
            .iter()
            .find(|b| b.bot_id == bot_id)
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn update_bot_password(
        &self,
        bot_id: i64,
        password: &str,
        secret_index: i16,
    ) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        let row = state
            .bot_logins
            .iter_mut()
            .find(|b| b.bot_id == bot_id)
            .ok_or(DbError::NotFound)?;
        row.password = password.to_owned();
        row.secret_index = secret_index;
        Ok(())
    }

    async fn insert_otp_enrollment(
        &self,
        otp: OtpRecordRow,
        codes: Vec<OtpRecoveryCodeRow>,
    ) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        let row = state
            .user_logins
            .iter_mut()
            .find(|u| u.user_id == otp.user_id)
            .ok_or(DbError::NotFound)?;
        row.otp = Some(otp);
        state.recovery_codes.extend(codes);
        Ok(())
    }

    async fn fetch_recovery_code(
        &self,
        user_id: i64,
        key_id: i16,
    ) -> Result<OtpRecoveryCodeRow, DbError> {
        let state = self.state.lock().unwrap();
        state
            .recovery_codes
            .iter()
            .find(|c| c.user_id == user_id && c.key_id == key_id)
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn delete_recovery_code(
        &self,
        user_id: i64,
        key_id: i16,
    ) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        let before = state.recovery_codes.len();
        state
            .recovery_codes
            .retain(|c| !(c.user_id == user_id && c.key_id == key_id));
        if state.recovery_codes.len() == before {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn delete_otp_record(&self, user_id: i64) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        let row = state
            .user_logins
            .iter_mut()
            .find(|u| u.user_id == user_id)
            .ok_or(DbError::NotFound)?;
        row.otp = None;
        Ok(())
    }

    async fn fetch_active_ban(
        &self,
        user_id: i64,
    ) -> Result<Option<BanRow>, DbError> {
        let state = self.state.lock().unwrap();
        let now = Utc::now();
        Ok(state
            .bans
            .iter()
            .find(|b| b.user_id == user_id && b.completed > now)
            .cloned())
    }

    async fn fetch_ip_ban(
        &self,
        ip_hash: &[u8],
    ) -> Result<Option<IpBanRow>, DbError> {
        let state = self.state.lock().unwrap();
        Ok(state.ip_bans.iter().find(|b| b.ip_hash == ip_hash).cloned())
    }

    async fn insert_ip_ban(
        &self,
        ip_hash: &[u8],
        ban_id: i64,
    ) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        state.ip_bans.push(IpBanRow { ip_hash: ip_hash.to_vec(), ban_id });
        Ok(())
    }
}
