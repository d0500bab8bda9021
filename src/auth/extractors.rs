use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::warn;
use uuid::Uuid;

use crate::{error::AppError, state::AppState, users::Role};

/// Caller identified by a valid access token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
}

/// `None` when no Authorization header was sent. A header that is present
/// but invalid is still rejected.
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

/// An authenticated caller with the admin role.
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub AuthUser);

fn bearer(parts: &Parts) -> Option<Result<&str, AppError>> {
    let raw = parts.headers.get(AUTHORIZATION)?;
    let token = raw
        .to_str()
        .ok()
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Invalid authorization scheme".into()));
    Some(token)
}

fn verify(state: &AppState, token: &str) -> Result<AuthUser, AppError> {
    let claims = state.jwt.verify_access(token).map_err(|e| {
        warn!(error = %e, "access token rejected");
        AppError::Unauthorized("Invalid or expired token".into())
    })?;
    Ok(AuthUser {
        id: claims.sub,
        username: claims.username,
        role: claims.role,
    })
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer(parts)
            .unwrap_or_else(|| Err(AppError::Unauthorized("Access token required".into())))?;
        verify(state, token)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for MaybeAuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match bearer(parts) {
            None => Ok(MaybeAuthUser(None)),
            Some(token) => Ok(MaybeAuthUser(Some(verify(state, token?)?))),
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if user.role != Role::Admin {
            warn!(user_id = %user.id, "admin route denied");
            return Err(AppError::Forbidden("Admin access required".into()));
        }
        Ok(RequireAdmin(user))
    }
}
