use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::model::{ApiUsage, NewUser, Preferences, Profile, StoredToken, User};
use super::repo::{FailedLogin, StoreError, StoreResult, UserStore};

/// In-process credential store. Each operation runs under one lock, which
/// gives the same per-record atomicity as the SQL statements in `PgUserStore`.
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_users<R>(&self, f: impl FnOnce(&mut HashMap<Uuid, User>) -> R) -> StoreResult<R> {
        let mut guard = self
            .users
            .lock()
            .map_err(|_| StoreError::Corrupt("user map lock poisoned".into()))?;
        Ok(f(&mut guard))
    }

    fn with_user<R>(&self, id: Uuid, f: impl FnOnce(&mut User) -> R) -> StoreResult<Option<R>> {
        self.with_users(|users| users.get_mut(&id).map(f))
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, user: NewUser, now: OffsetDateTime) -> StoreResult<User> {
        self.with_users(|users| {
            if users.values().any(|u| u.email == user.email) {
                return Err(StoreError::Duplicate("email"));
            }
            if users.values().any(|u| u.username == user.username) {
                return Err(StoreError::Duplicate("username"));
            }
            let record = User {
                id: Uuid::new_v4(),
                username: user.username,
                email: user.email,
                password_hash: user.password_hash,
                role: user.role,
                is_active: true,
                profile: user.profile,
                preferences: user.preferences,
                api_usage: ApiUsage::fresh(now),
                tokens: Vec::new(),
                last_login: None,
                login_attempts: 0,
                lock_until: None,
                created_at: now,
                updated_at: now,
            };
            users.insert(record.id, record.clone());
            Ok(record)
        })?
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        self.with_users(|users| users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.with_users(|users| users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        self.with_users(|users| users.values().find(|u| u.username == username).cloned())
    }

    async fn clear_expired_lock(&self, id: Uuid, now: OffsetDateTime) -> StoreResult<bool> {
        let cleared = self.with_user(id, |u| {
            if u.has_expired_lock(now) {
                u.lock_until = None;
                u.login_attempts = 0;
                u.updated_at = now;
                true
            } else {
                false
            }
        })?;
        Ok(cleared.unwrap_or(false))
    }

    async fn register_failed_login(
        &self,
        id: Uuid,
        max_attempts: i32,
        lock_until: OffsetDateTime,
    ) -> StoreResult<FailedLogin> {
        self.with_user(id, |u| {
            u.login_attempts += 1;
            if u.login_attempts >= max_attempts {
                u.lock_until = Some(lock_until);
            }
            FailedLogin {
                attempts: u.login_attempts,
                lock_until: u.lock_until,
            }
        })?
        .ok_or(StoreError::Database(sqlx::Error::RowNotFound))
    }

    async fn record_successful_login(&self, id: Uuid, now: OffsetDateTime) -> StoreResult<()> {
        self.with_user(id, |u| {
            u.login_attempts = 0;
            u.lock_until = None;
            u.last_login = Some(now);
            u.updated_at = now;
        })?;
        Ok(())
    }

    async fn push_token(
        &self,
        id: Uuid,
        token: &str,
        issued_at: OffsetDateTime,
    ) -> StoreResult<()> {
        self.with_user(id, |u| {
            u.tokens.push(StoredToken {
                token: token.to_string(),
                issued_at,
            })
        })?;
        Ok(())
    }

    async fn find_token(&self, id: Uuid, token: &str) -> StoreResult<Option<StoredToken>> {
        let found = self.with_user(id, |u| u.tokens.iter().find(|t| t.token == token).cloned())?;
        Ok(found.flatten())
    }

    async fn take_token(&self, id: Uuid, token: &str) -> StoreResult<Option<StoredToken>> {
        let taken = self.with_user(id, |u| {
            let idx = u.tokens.iter().position(|t| t.token == token)?;
            Some(u.tokens.remove(idx))
        })?;
        Ok(taken.flatten())
    }

    async fn remove_token(&self, id: Uuid, token: &str) -> StoreResult<bool> {
        let removed = self.with_user(id, |u| {
            let before = u.tokens.len();
            u.tokens.retain(|t| t.token != token);
            u.tokens.len() != before
        })?;
        Ok(removed.unwrap_or(false))
    }

    async fn remove_all_tokens(&self, id: Uuid) -> StoreResult<u64> {
        let removed = self.with_user(id, |u| {
            let n = u.tokens.len() as u64;
            u.tokens.clear();
            n
        })?;
        Ok(removed.unwrap_or(0))
    }

    async fn remove_tokens_issued_before(&self, cutoff: OffsetDateTime) -> StoreResult<u64> {
        self.with_users(|users| {
            users
                .values_mut()
                .map(|u| {
                    let before = u.tokens.len();
                    u.tokens.retain(|t| t.issued_at >= cutoff);
                    (before - u.tokens.len()) as u64
                })
                .sum()
        })
    }

    async fn record_api_usage(
        &self,
        id: Uuid,
        now: OffsetDateTime,
        next_reset: OffsetDateTime,
    ) -> StoreResult<Option<ApiUsage>> {
        self.with_user(id, |u| {
            u.api_usage.apply_request(now, next_reset);
            u.api_usage.clone()
        })
    }

    async fn update_password_hash(&self, id: Uuid, hash: &str) -> StoreResult<()> {
        self.with_user(id, |u| u.password_hash = hash.to_string())?;
        Ok(())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        profile: &Profile,
        preferences: &Preferences,
    ) -> StoreResult<()> {
        self.with_user(id, |u| {
            u.profile = profile.clone();
            u.preferences = preferences.clone();
        })?;
        Ok(())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> StoreResult<bool> {
        let found = self.with_user(id, |u| u.is_active = active)?;
        Ok(found.is_some())
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        self.with_users(|users| users.remove(&id).is_some())
    }
}
