use axum::http::StatusCode;
use sea_orm::DbErr;
use thiserror::Error;

/// Failures of the persisted grant store.
///
/// Every reason a grant cannot be redeemed (unknown, expired, consumed, bound to
/// another client) collapses into [`GrantError::InvalidGrant`] so callers cannot
/// probe grant validity.
#[derive(Debug, Error)]
pub enum GrantError {
    #[error("invalid grant")]
    InvalidGrant,
    #[error("unknown client: {0}")]
    UnknownClient(String),
    #[error("grant store error: {0}")]
    Store(#[from] DbErr),
    #[error("grant payload error: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("failed to generate grant handle: {0}")]
    Random(#[from] getrandom::Error),
}

/// OAuth2/OIDC protocol errors, named after their RFC 6749 error codes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid_request: {0}")]
    InvalidRequest(String),
    #[error("invalid_client")]
    InvalidClient,
    #[error("invalid_grant")]
    InvalidGrant,
    #[error("unauthorized_client: {0}")]
    UnauthorizedClient(String),
    #[error("unsupported_grant_type")]
    UnsupportedGrantType,
    #[error("unsupported_response_type")]
    UnsupportedResponseType,
    #[error("invalid_scope: {0}")]
    InvalidScope(String),
    #[error("access_denied: {0}")]
    AccessDenied(String),
    #[error("invalid_token")]
    InvalidToken,
    #[error("insufficient_scope: {0}")]
    InsufficientScope(String),
    #[error("server_error: {0}")]
    Server(String),
}

impl ProtocolError {
    /// RFC 6749 / RFC 6750 error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            ProtocolError::InvalidRequest(_) => "invalid_request",
            ProtocolError::InvalidClient => "invalid_client",
            ProtocolError::InvalidGrant => "invalid_grant",
            ProtocolError::UnauthorizedClient(_) => "unauthorized_client",
            ProtocolError::UnsupportedGrantType => "unsupported_grant_type",
            ProtocolError::UnsupportedResponseType => "unsupported_response_type",
            ProtocolError::InvalidScope(_) => "invalid_scope",
            ProtocolError::AccessDenied(_) => "access_denied",
            ProtocolError::InvalidToken => "invalid_token",
            ProtocolError::InsufficientScope(_) => "insufficient_scope",
            ProtocolError::Server(_) => "server_error",
        }
    }

    /// Description safe to return to the caller. Server errors never leak detail.
    pub fn description(&self) -> Option<String> {
        match self {
            ProtocolError::InvalidRequest(d)
            | ProtocolError::UnauthorizedClient(d)
            | ProtocolError::InvalidScope(d)
            | ProtocolError::AccessDenied(d)
            | ProtocolError::InsufficientScope(d) => Some(d.clone()),
            _ => None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProtocolError::InvalidClient | ProtocolError::InvalidToken => StatusCode::UNAUTHORIZED,
            ProtocolError::InsufficientScope(_) => StatusCode::FORBIDDEN,
            ProtocolError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<GrantError> for ProtocolError {
    fn from(err: GrantError) -> Self {
        match err {
            GrantError::InvalidGrant => ProtocolError::InvalidGrant,
            GrantError::UnknownClient(_) => ProtocolError::InvalidClient,
            other => ProtocolError::Server(other.to_string()),
        }
    }
}

impl From<DbErr> for ProtocolError {
    fn from(err: DbErr) -> Self {
        ProtocolError::Server(err.to_string())
    }
}
