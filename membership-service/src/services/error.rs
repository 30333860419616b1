use service_core::error::AppError;
use thiserror::Error;

/// Message returned for every authorization failure except expiry.
pub const UNAUTHORIZED_MESSAGE: &str = "You are not authorized to perform this action.";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Token signature invalid")]
    SignatureInvalid,

    #[error("Token expired")]
    Expired,

    #[error("Token revoked")]
    Revoked,

    #[error("Malformed token claims")]
    MalformedClaims,

    #[error("Missing bearer token")]
    MissingToken,

    #[error("Token signing failed: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),

    #[error("Token cache write failed: {0}")]
    CacheWrite(#[source] anyhow::Error),

    #[error("Token id not present in cache")]
    CacheDelete,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Member could not be loaded: {0}")]
    MemberLoad(#[source] anyhow::Error),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Token cache unavailable: {0}")]
    Cache(#[source] anyhow::Error),
}

impl AuthError {
    /// Faults of the service itself rather than of the caller's credentials.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            AuthError::Signing(_)
                | AuthError::CacheWrite(_)
                | AuthError::MemberLoad(_)
                | AuthError::Cache(_)
        )
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Expired => AppError::Forbidden(anyhow::anyhow!("Token expired")),
            AuthError::Signing(e) => {
                AppError::InternalError(anyhow::anyhow!("Token signing failed: {}", e))
            }
            AuthError::CacheWrite(e) | AuthError::Cache(e) => AppError::CacheError(e),
            AuthError::MemberLoad(e) => AppError::DatabaseError(e),
            AuthError::InvalidCredentials => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid credentials"))
            }
            AuthError::SignatureInvalid
            | AuthError::Revoked
            | AuthError::MalformedClaims
            | AuthError::MissingToken
            | AuthError::CacheDelete
            | AuthError::PermissionDenied => {
                AppError::Unauthorized(anyhow::anyhow!(UNAUTHORIZED_MESSAGE))
            }
        }
    }
}
