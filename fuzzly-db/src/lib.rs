//! The relational half of the two-tier cache (§9: "two-tier cache (in-
//! process + KV) with TTLs" — this crate is the authoritative tier).
//!
//! [`AuthDb`] is a hand-written CRUD trait over the tables in §3.1, rather
//! than a reflective ORM (§9 design note): every method corresponds to one
//! query, and column names are part of the public contract.

pub mod mem;
pub mod models;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    BanRow, BotLoginRow, IpBanRow, LoginLookupRow, OtpRecordRow,
    OtpRecoveryCodeRow, SigningKeyRow,
};

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found")]
    NotFound,
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Other(String),
}

#[async_trait]
pub trait AuthDb: Send + Sync {
    // -- auth.token_keys --

    /// Insert a freshly self-signed key and return the generated `key_id`,
    /// `issued`, `expires` (§4.1).
    async fn insert_signing_key(
        &self,
        algorithm: i16,
        public_key: &[u8],
        signature: &[u8],
        expires: DateTime<Utc>,
    ) -> Result<SigningKeyRow, DbError>;

    async fn fetch_signing_key(
        &self,
        algorithm: i16,
        key_id: i64,
    ) -> Result<SigningKeyRow, DbError>;

    // -- users / auth.user_login --

    /// Create the `users` row and its `auth.user_login` row in one
    /// transaction, returning the generated `user_id` (§4.6 "User create").
    /// `users` is owned by the wider application, not by this crate, but
    /// account creation still needs both rows to appear atomically.
    async fn insert_user(
        &self,
        handle: &str,
        name: &str,
        email_hash: &[u8],
        password: &str,
        secret_index: i16,
    ) -> Result<i64, DbError>;

    async fn fetch_login_by_email_hash(
        &self,
        email_hash: &[u8],
    ) -> Result<LoginLookupRow, DbError>;

    async fn update_password(
        &self,
        user_id: i64,
        password: &str,
        secret_index: i16,
    ) -> Result<(), DbError>;

    // -- auth.bot_login --

    async fn upsert_bot_login(
        &self,
        user_id: Option<i64>,
        password: &str,
        secret_index: i16,
        bot_type_id: i16,
        created_by: Option<i64>,
    ) -> Result<BotLoginRow, DbError>;

    async fn fetch_bot_login(&self, bot_id: i64) -> Result<BotLoginRow, DbError>;

    async fn update_bot_password(
        &self,
        bot_id: i64,
        password: &str,
        secret_index: i16,
    ) -> Result<(), DbError>;

    // -- auth.otp / auth.otp_recovery_code --

    /// Insert the OTP record and its 16 recovery codes transactionally
    /// (§4.5 step 4).
    async fn insert_otp_enrollment(
        &self,
        otp: OtpRecordRow,
        codes: Vec<OtpRecoveryCodeRow>,
    ) -> Result<(), DbError>;

    async fn fetch_recovery_code(
        &self,
        user_id: i64,
        key_id: i16,
    ) -> Result<OtpRecoveryCodeRow, DbError>;

    async fn delete_recovery_code(
        &self,
        user_id: i64,
        key_id: i16,
    ) -> Result<(), DbError>;

    async fn delete_otp_record(&self, user_id: i64) -> Result<(), DbError>;

    // -- reporting.bans / reporting.ip_bans --

    async fn fetch_active_ban(
        &self,
        user_id: i64,
    ) -> Result<Option<BanRow>, DbError>;

    async fn fetch_ip_ban(
        &self,
        ip_hash: &[u8],
    ) -> Result<Option<IpBanRow>, DbError>;

    async fn insert_ip_ban(
        &self,
        ip_hash: &[u8],
        ban_id: i64,
    ) -> Result<(), DbError>;
}
