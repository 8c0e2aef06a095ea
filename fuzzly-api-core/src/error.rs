//! The auth subsystem's error taxonomy (§7), modeled as a single error sum
//! type rather than exception-handler-mapped exceptions: every public
//! operation in `fuzzly-auth` returns `Result<T, AuthError>`, and the HTTP
//! boundary maps `AuthErrorKind` to a status code in exactly one table
//! ([`AuthErrorKind::to_status`]).

use std::fmt;

#[cfg(feature = "axum")]
use axum::response::IntoResponse;
use http::StatusCode;
use serde::{Deserialize, Serialize};

/// One-line discriminators from §7's error table, plus three variants
/// (`PreconditionFailed`, `UnsupportedMedia`, `NotImplemented`) carried over
/// from the original system's `shared/exceptions/http_error.py`, which this
/// subsystem's callers may still need even though §7's table doesn't
/// surface them directly.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum AuthErrorKind {
    BadRequest,
    Unauthorized,
    /// Wrong password, wrong OTP, or unknown user. Carries the identical
    /// message in every case (§7) to avoid a user-enumeration oracle.
    FailedLogin,
    Forbidden,
    NotFound,
    Conflict,
    PreconditionFailed,
    UnsupportedMedia,
    UnprocessableEntity,
    InternalServerError,
    NotImplemented,
    BadGateway,
    ServiceUnavailable,
}

impl AuthErrorKind {
    pub const fn to_status(self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::FailedLogin => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            Self::UnsupportedMedia => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::UnprocessableEntity => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            Self::BadGateway => StatusCode::BAD_GATEWAY,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub const fn to_name(self) -> &'static str {
        match self {
            Self::BadRequest => "BadRequest",
            Self::Unauthorized => "Unauthorized",
            Self::FailedLogin => "FailedLogin",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "NotFound",
            Self::Conflict => "Conflict",
            Self::PreconditionFailed => "PreconditionFailed",
            Self::UnsupportedMedia => "UnsupportedMedia",
            Self::UnprocessableEntity => "UnprocessableEntity",
            Self::InternalServerError => "InternalServerError",
            Self::NotImplemented => "NotImplemented",
            Self::BadGateway => "BadGateway",
            Self::ServiceUnavailable => "ServiceUnavailable",
        }
    }
}

impl fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_name())
    }
}

/// A concrete auth error: a kind plus a human-readable message. `refid` is
/// only populated for `InternalServerError` (§7: "a refid is logged and
/// returned").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthError {
    pub kind: AuthErrorKind,
    pub msg: String,
    pub refid: Option<String>,
}

impl AuthError {
    pub fn new(kind: AuthErrorKind, msg: impl Into<String>) -> Self {
        Self { kind, msg: msg.into(), refid: None }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::BadRequest, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Unauthorized, msg)
    }

    /// Same text for password, OTP, and unknown-user failures (§7, §8
    /// scenario 2: `"Failed Login: login failed."`).
    pub fn failed_login() -> Self {
        Self::new(AuthErrorKind::FailedLogin, "Failed Login: login failed.")
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Forbidden, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::NotFound, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Conflict, msg)
    }

    pub fn unprocessable_entity(msg: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::UnprocessableEntity, msg)
    }

    /// Builds an `InternalServerError` carrying a fresh `refid`; callers
    /// should log the same refid alongside the underlying cause before
    /// returning this to an HTTP caller.
    pub fn internal(refid: impl Into<String>) -> Self {
        let refid = refid.into();
        Self {
            kind: AuthErrorKind::InternalServerError,
            msg: "internal error".to_owned(),
            refid: Some(refid),
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.msg)
    }
}

impl std::error::Error for AuthError {}

/// The wire-serialized error body (§7: `{status, code, refid, error}`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub code: String,
    pub refid: Option<String>,
    pub error: String,
}

impl From<&AuthError> for ErrorResponse {
    fn from(err: &AuthError) -> Self {
        Self {
            status: err.kind.to_status().as_u16(),
            code: err.kind.to_name().to_owned(),
            refid: err.refid.clone(),
            // `error` carries the bare message (§8 scenario 2: "error
            // matching the exact text `Failed Login: login failed.`"),
            // not `Display`'s `{kind}: {msg}` (that form is for logs, where
            // the kind gives a log-line discriminator the client response
            // already has in `code`).
            error: err.msg.clone(),
        }
    }
}

#[cfg(feature = "axum")]
impl IntoResponse for AuthError {
    fn into_response(self) -> axum::response::Response {
        let status = self.kind.to_status();
        let body = ErrorResponse::from(&self);
        (status, axum::Json(body)).into_response()
    }
}

/// A single `{loc, msg, type}` validation error entry, used by
/// `UnprocessableEntity` responses to stay compatible with existing clients
/// (§7).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnprocessableDetail {
    pub loc: Vec<String>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_table_matches_spec() {
        assert_eq!(AuthErrorKind::BadRequest.to_status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AuthErrorKind::Unauthorized.to_status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthErrorKind::FailedLogin.to_status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AuthErrorKind::Forbidden.to_status(), StatusCode::FORBIDDEN);
        assert_eq!(AuthErrorKind::NotFound.to_status(), StatusCode::NOT_FOUND);
        assert_eq!(AuthErrorKind::Conflict.to_status(), StatusCode::CONFLICT);
        assert_eq!(
            AuthErrorKind::UnprocessableEntity.to_status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AuthErrorKind::InternalServerError.to_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(AuthErrorKind::BadGateway.to_status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            AuthErrorKind::ServiceUnavailable.to_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn failed_login_message_is_fixed() {
        let err = AuthError::failed_login();
        assert_eq!(err.to_string(), "FailedLogin: Failed Login: login failed.");
    }

    #[test]
    fn failed_login_response_body_matches_exact_text() {
        let err = AuthError::failed_login();
        let body = ErrorResponse::from(&err);
        assert_eq!(body.code, "FailedLogin");
        assert_eq!(body.error, "Failed Login: login failed.");
        assert_eq!(body.status, 401);
    }
}
