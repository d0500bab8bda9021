use time::OffsetDateTime;

use crate::users::{validate::ValidationError, StoreError};

/// Failures surfaced by the auth service.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Unknown email and wrong password look the same to the caller.
    #[error("Invalid login credentials")]
    InvalidCredentials,

    #[error("Account is temporarily locked due to too many failed login attempts")]
    AccountLocked { until: OffsetDateTime },

    #[error("Account is deactivated")]
    AccountDisabled,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0} already registered")]
    Conflict(&'static str),

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("storage failure: {0}")]
    Store(StoreError),

    #[error("internal auth error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate(field) => AuthError::Conflict(field),
            other => AuthError::Store(other),
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
