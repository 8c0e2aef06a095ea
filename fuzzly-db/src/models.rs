//! Row types for the tables in §3.1. Field names and types mirror the
//! column-level contract; nothing here is inferred from an ORM.

use chrono::{DateTime, Utc};

#[derive(Clone, Debug)]
pub struct SigningKeyRow {
    pub key_id: i64,
    pub algorithm: i16,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
    pub issued: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct UserLoginRow {
    pub user_id: i64,
    pub email_hash: Vec<u8>,
    pub password: String,
    pub secret_index: i16,
}

#[derive(Clone, Debug)]
pub struct BotLoginRow {
    pub bot_id: i64,
    pub user_id: Option<i64>,
    pub password: String,
    pub secret_index: i16,
    pub bot_type_id: i16,
    pub created_by: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct OtpRecordRow {
    pub user_id: i64,
    pub secret_index: i16,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct OtpRecoveryCodeRow {
    pub user_id: i64,
    pub key_id: i16,
    pub secret_index: i16,
    pub recovery_key: String,
}

#[derive(Clone, Debug)]
pub struct BanRow {
    pub ban_id: i64,
    pub ban_type: BanType,
    pub user_id: i64,
    pub created: DateTime<Utc>,
    pub completed: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BanType {
    User,
    Ip,
}

#[derive(Clone, Debug)]
pub struct IpBanRow {
    pub ip_hash: Vec<u8>,
    pub ban_id: i64,
}

/// The joined row `login` fetches (§4.6 step 3): user login plus optional
/// OTP enrollment plus the user-table fields the scope-assignment logic
/// needs.
#[derive(Clone, Debug)]
pub struct LoginLookupRow {
    pub user_id: i64,
    pub password: String,
    pub secret_index: i16,
    pub handle: String,
    pub name: Option<String>,
    pub is_mod: bool,
    pub otp: Option<OtpRecordRow>,
}
