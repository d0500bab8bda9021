//! Credential verification, lockout, token lifecycle and usage accounting.
//!
//! Every function takes the store and the current time explicitly; the
//! service holds no state of its own.

use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

use super::error::{AuthError, AuthResult};
use super::jwt::JwtKeys;
use super::password::{hash_password_blocking, verify_dummy_blocking, verify_password_blocking};
use crate::users::{
    model::{next_month_start, TOKEN_RECORD_TTL},
    validate::{self, normalize_email, normalize_preferences},
    ApiUsage, NewUser, Preferences, Profile, Role, User, UserStore,
};

pub const MAX_LOGIN_ATTEMPTS: i32 = 5;
pub const LOCK_DURATION: Duration = Duration::hours(2);

#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub username: String,
    pub email: String,
    pub password: String,
    pub profile: Option<Profile>,
    pub preferences: Option<Preferences>,
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

pub async fn register(
    store: &dyn UserStore,
    input: RegisterInput,
    now: OffsetDateTime,
) -> AuthResult<User> {
    let reg = validate::validate_registration(
        &input.username,
        &input.email,
        &input.password,
        input.profile,
    )?;

    if store.find_by_email(&reg.email).await?.is_some() {
        return Err(AuthError::Conflict("email"));
    }
    if store.find_by_username(&reg.username).await?.is_some() {
        return Err(AuthError::Conflict("username"));
    }

    let password_hash = hash_password_blocking(reg.password).await?;
    let user = store
        .create(
            NewUser {
                username: reg.username,
                email: reg.email,
                password_hash,
                role: Role::User,
                profile: reg.profile,
                preferences: normalize_preferences(input.preferences.unwrap_or_default()),
            },
            now,
        )
        .await?;
    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(user)
}

/// Verifies `email`/`password`, applying the lockout policy.
pub async fn authenticate(
    store: &dyn UserStore,
    email: &str,
    password: &str,
    now: OffsetDateTime,
) -> AuthResult<User> {
    let email = normalize_email(email);
    let mut user = match store.find_by_email(&email).await? {
        Some(u) => u,
        None => {
            verify_dummy_blocking(password.to_string()).await;
            warn!("login unknown email");
            return Err(AuthError::InvalidCredentials);
        }
    };

    if user.has_expired_lock(now) {
        store.clear_expired_lock(user.id, now).await?;
        user.lock_until = None;
        user.login_attempts = 0;
    }

    if let Some(until) = user.lock_until.filter(|until| *until > now) {
        warn!(user_id = %user.id, "login attempt on locked account");
        return Err(AuthError::AccountLocked { until });
    }

    let matches = verify_password_blocking(password.to_string(), user.password_hash.clone()).await?;
    if !matches {
        let failed = store
            .register_failed_login(user.id, MAX_LOGIN_ATTEMPTS, now + LOCK_DURATION)
            .await?;
        if failed.attempts >= MAX_LOGIN_ATTEMPTS {
            warn!(user_id = %user.id, attempts = failed.attempts, "account locked");
        } else {
            warn!(user_id = %user.id, attempts = failed.attempts, "login invalid password");
        }
        return Err(AuthError::InvalidCredentials);
    }

    if !user.is_active {
        warn!(user_id = %user.id, "login on deactivated account");
        return Err(AuthError::AccountDisabled);
    }

    store.record_successful_login(user.id, now).await?;
    user.login_attempts = 0;
    user.lock_until = None;
    user.last_login = Some(now);
    info!(user_id = %user.id, "user logged in");
    Ok(user)
}

pub fn issue_access_token(keys: &JwtKeys, user: &User) -> AuthResult<String> {
    Ok(keys.sign_access(user)?)
}

/// Signs a refresh token and records it in the user's token collection.
pub async fn issue_refresh_token(
    store: &dyn UserStore,
    keys: &JwtKeys,
    user_id: Uuid,
    now: OffsetDateTime,
) -> AuthResult<String> {
    let token = keys.sign_refresh(user_id)?;
    store.push_token(user_id, &token, now).await?;
    Ok(token)
}

pub async fn issue_token_pair(
    store: &dyn UserStore,
    keys: &JwtKeys,
    user: &User,
    now: OffsetDateTime,
) -> AuthResult<TokenPair> {
    Ok(TokenPair {
        access_token: issue_access_token(keys, user)?,
        refresh_token: issue_refresh_token(store, keys, user.id, now).await?,
    })
}

/// Exchanges a live refresh token for a new pair. The old record is removed.
pub async fn rotate_refresh_token(
    store: &dyn UserStore,
    keys: &JwtKeys,
    token: &str,
    now: OffsetDateTime,
) -> AuthResult<(User, TokenPair)> {
    let claims = keys.verify_refresh(token).map_err(|e| {
        warn!(error = %e, "refresh token rejected");
        AuthError::InvalidToken
    })?;

    let user = store
        .find_by_id(claims.sub)
        .await?
        .ok_or(AuthError::InvalidToken)?;

    // Taking the record is the gate: a concurrent rotation of the same
    // token finds nothing left.
    let stored = store
        .take_token(user.id, token)
        .await?
        .ok_or_else(|| {
            warn!(user_id = %user.id, "refresh token not on record");
            AuthError::InvalidToken
        })?;
    if !stored.is_live(now) {
        warn!(user_id = %user.id, "expired refresh token record");
        return Err(AuthError::InvalidToken);
    }
    if !user.is_active {
        return Err(AuthError::AccountDisabled);
    }

    let pair = issue_token_pair(store, keys, &user, now).await?;
    Ok((user, pair))
}

pub async fn revoke_token(store: &dyn UserStore, user_id: Uuid, token: &str) -> AuthResult<bool> {
    let removed = store.remove_token(user_id, token).await?;
    info!(%user_id, removed, "token revoked");
    Ok(removed)
}

pub async fn revoke_all_tokens(store: &dyn UserStore, user_id: Uuid) -> AuthResult<u64> {
    let removed = store.remove_all_tokens(user_id).await?;
    info!(%user_id, removed, "all tokens revoked");
    Ok(removed)
}

/// Drops token records older than the record TTL across all users.
pub async fn sweep_expired_tokens(store: &dyn UserStore, now: OffsetDateTime) -> AuthResult<u64> {
    let removed = store.remove_tokens_issued_before(now - TOKEN_RECORD_TTL).await?;
    if removed > 0 {
        info!(removed, "expired tokens swept");
    }
    Ok(removed)
}

pub async fn record_api_usage(
    store: &dyn UserStore,
    user_id: Uuid,
    now: OffsetDateTime,
) -> AuthResult<ApiUsage> {
    store
        .record_api_usage(user_id, now, next_month_start(now))
        .await?
        .ok_or(AuthError::NotFound("user"))
}

/// Replaces the password after checking the current one; every issued
/// token is revoked.
pub async fn change_password(
    store: &dyn UserStore,
    user_id: Uuid,
    current: &str,
    new: &str,
) -> AuthResult<()> {
    validate::validate_password("newPassword", new)?;
    let user = store
        .find_by_id(user_id)
        .await?
        .ok_or(AuthError::NotFound("user"))?;

    if !verify_password_blocking(current.to_string(), user.password_hash.clone()).await? {
        return Err(AuthError::InvalidCredentials);
    }

    let hash = hash_password_blocking(new.to_string()).await?;
    store.update_password_hash(user_id, &hash).await?;
    store.remove_all_tokens(user_id).await?;
    info!(%user_id, "password changed");
    Ok(())
}

/// Enables or disables an account. Disabling also signs it out everywhere.
pub async fn set_account_active(
    store: &dyn UserStore,
    user_id: Uuid,
    active: bool,
) -> AuthResult<User> {
    if !store.set_active(user_id, active).await? {
        return Err(AuthError::NotFound("user"));
    }
    if !active {
        store.remove_all_tokens(user_id).await?;
    }
    info!(%user_id, active, "account status changed");
    store
        .find_by_id(user_id)
        .await?
        .ok_or(AuthError::NotFound("user"))
}

/// Removes the account together with its token records.
pub async fn delete_account(store: &dyn UserStore, user_id: Uuid) -> AuthResult<()> {
    if !store.delete(user_id).await? {
        return Err(AuthError::NotFound("user"));
    }
    info!(%user_id, "account deleted");
    Ok(())
}

pub async fn update_profile(
    store: &dyn UserStore,
    user_id: Uuid,
    profile: Option<Profile>,
    preferences: Option<Preferences>,
) -> AuthResult<User> {
    let mut user = store
        .find_by_id(user_id)
        .await?
        .ok_or(AuthError::NotFound("user"))?;

    if let Some(p) = profile {
        user.profile = validate::validate_profile(p)?;
    }
    if let Some(p) = preferences {
        user.preferences = normalize_preferences(p);
    }
    store
        .update_profile(user_id, &user.profile, &user.preferences)
        .await?;
    Ok(user)
}
