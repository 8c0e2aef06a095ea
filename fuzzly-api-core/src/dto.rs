//! Request/response bodies for the auth-relevant HTTP subset (§6).

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub otp: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub email: String,
    pub name: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FinalizeAccountRequest {
    pub name: String,
    pub handle: String,
    pub password: String,
    pub token: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub email: String,
    pub password: String,
    pub new_password: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BotLoginRequest {
    pub token: String,
}

/// `TokenResponse`, per `shared/models/auth.py`.
#[derive(Clone, Debug, Serialize)]
pub struct TokenResponse {
    pub version: String,
    pub algorithm: String,
    pub key_id: i64,
    pub issued: i64,
    pub expires: i64,
    pub token: String,
}

/// `LoginResponse`, per `shared/models/auth.py`.
#[derive(Clone, Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: i64,
    pub handle: String,
    pub name: Option<String>,
    #[serde(rename = "mod")]
    pub is_mod: bool,
    pub token: TokenResponse,
}

#[derive(Clone, Debug, Serialize)]
pub struct BotCreateResponse {
    pub token: String,
}

/// `PublicKeyResponse`, per `shared/models/auth.py`.
#[derive(Clone, Debug, Serialize)]
pub struct PublicKeyResponse {
    pub algorithm: String,
    pub key: String,
    pub signature: String,
    pub issued: i64,
    pub expires: i64,
}
