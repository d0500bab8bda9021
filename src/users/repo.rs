use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::model::{ApiUsage, NewUser, Preferences, Profile, StoredToken, User};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} already registered")]
    Duplicate(&'static str),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of recording a failed login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailedLogin {
    pub attempts: i32,
    pub lock_until: Option<OffsetDateTime>,
}

/// Persistence for user records. Every mutation is applied as one atomic
/// step on the stored record, so two concurrent logins for the same user
/// cannot lose an update.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: NewUser, now: OffsetDateTime) -> StoreResult<User>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>>;

    /// Clears the lock and attempt counter, only if the lock has expired.
    async fn clear_expired_lock(&self, id: Uuid, now: OffsetDateTime) -> StoreResult<bool>;

    /// Increments the attempt counter and sets `lock_until` once the new
    /// count reaches `max_attempts`.
    async fn register_failed_login(
        &self,
        id: Uuid,
        max_attempts: i32,
        lock_until: OffsetDateTime,
    ) -> StoreResult<FailedLogin>;

    async fn record_successful_login(&self, id: Uuid, now: OffsetDateTime) -> StoreResult<()>;

    async fn push_token(&self, id: Uuid, token: &str, issued_at: OffsetDateTime)
        -> StoreResult<()>;

    async fn find_token(&self, id: Uuid, token: &str) -> StoreResult<Option<StoredToken>>;

    /// Deletes the record and hands it back. Of several concurrent callers
    /// with the same token at most one gets `Some`.
    async fn take_token(&self, id: Uuid, token: &str) -> StoreResult<Option<StoredToken>>;

    async fn remove_token(&self, id: Uuid, token: &str) -> StoreResult<bool>;

    async fn remove_all_tokens(&self, id: Uuid) -> StoreResult<u64>;

    /// Removes token records of every user issued strictly before `cutoff`.
    async fn remove_tokens_issued_before(&self, cutoff: OffsetDateTime) -> StoreResult<u64>;

    /// Counts one request. If `now` has reached the stored reset date the
    /// monthly counter restarts and the reset date moves to `next_reset`.
    async fn record_api_usage(
        &self,
        id: Uuid,
        now: OffsetDateTime,
        next_reset: OffsetDateTime,
    ) -> StoreResult<Option<ApiUsage>>;

    async fn update_password_hash(&self, id: Uuid, hash: &str) -> StoreResult<()>;

    async fn update_profile(
        &self,
        id: Uuid,
        profile: &Profile,
        preferences: &Preferences,
    ) -> StoreResult<()>;

    /// Returns false when no such user exists.
    async fn set_active(&self, id: Uuid, active: bool) -> StoreResult<bool>;

    async fn delete(&self, id: Uuid) -> StoreResult<bool>;

    /// Releases underlying connections.
    async fn close(&self) {}
}
