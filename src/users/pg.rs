use async_trait::async_trait;
use sqlx::{types::Json, FromRow, PgPool};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use super::model::{ApiUsage, NewUser, Preferences, Profile, Role, StoredToken, User};
use super::repo::{FailedLogin, StoreError, StoreResult, UserStore};

const USER_COLUMNS: &str = r#"
    id, username, email, password_hash, role, is_active, profile, preferences,
    total_requests, monthly_requests, last_request_at, usage_reset_at,
    last_login, login_attempts, lock_until, created_at, updated_at
"#;

/// Row shape of the `users` table.
#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    role: String,
    is_active: bool,
    profile: Json<Profile>,
    preferences: Json<Preferences>,
    total_requests: i64,
    monthly_requests: i64,
    last_request_at: Option<OffsetDateTime>,
    usage_reset_at: OffsetDateTime,
    last_login: Option<OffsetDateTime>,
    login_attempts: i32,
    lock_until: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

#[derive(Debug, FromRow)]
struct TokenRow {
    token: String,
    issued_at: OffsetDateTime,
}

impl From<TokenRow> for StoredToken {
    fn from(r: TokenRow) -> Self {
        Self {
            token: r.token,
            issued_at: r.issued_at,
        }
    }
}

impl UserRow {
    fn into_user(self, tokens: Vec<StoredToken>) -> StoreResult<User> {
        let role = Role::parse(&self.role)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown role {:?}", self.role)))?;
        Ok(User {
            id: self.id,
            username: self.username,
            email: self.email,
            password_hash: self.password_hash,
            role,
            is_active: self.is_active,
            profile: self.profile.0,
            preferences: self.preferences.0,
            api_usage: ApiUsage {
                total_requests: self.total_requests,
                monthly_requests: self.monthly_requests,
                last_request_at: self.last_request_at,
                reset_date: self.usage_reset_at,
            },
            tokens,
            last_login: self.last_login,
            login_attempts: self.login_attempts,
            lock_until: self.lock_until,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// PostgreSQL-backed credential store.
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_tokens(&self, id: Uuid) -> StoreResult<Vec<StoredToken>> {
        let rows = sqlx::query_as::<_, TokenRow>(
            r#"
            SELECT token, issued_at
            FROM user_tokens
            WHERE user_id = $1
            ORDER BY issued_at ASC, id ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(StoredToken::from).collect())
    }

    async fn hydrate(&self, row: Option<UserRow>) -> StoreResult<Option<User>> {
        match row {
            Some(row) => {
                let tokens = self.load_tokens(row.id).await?;
                Ok(Some(row.into_user(tokens)?))
            }
            None => Ok(None),
        }
    }

    async fn find_one(&self, column: &str, value: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        self.hydrate(row).await
    }
}

fn map_unique_violation(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some("23505") {
            let field = match db.constraint() {
                Some(c) if c.contains("username") => "username",
                _ => "email",
            };
            return StoreError::Duplicate(field);
        }
    }
    StoreError::Database(e)
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: NewUser, now: OffsetDateTime) -> StoreResult<User> {
        let usage = ApiUsage::fresh(now);
        let sql = format!(
            r#"
            INSERT INTO users (id, username, email, password_hash, role, profile, preferences,
                               usage_reset_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.role.as_str())
            .bind(Json(&user.profile))
            .bind(Json(&user.preferences))
            .bind(usage.reset_date)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(map_unique_violation)?;
        row.into_user(Vec::new())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        self.hydrate(row).await
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.find_one("email", email).await
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        self.find_one("username", username).await
    }

    async fn clear_expired_lock(&self, id: Uuid, now: OffsetDateTime) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE users
            SET lock_until = NULL, login_attempts = 0, updated_at = $2
            WHERE id = $1 AND lock_until IS NOT NULL AND lock_until <= $2
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn register_failed_login(
        &self,
        id: Uuid,
        max_attempts: i32,
        lock_until: OffsetDateTime,
    ) -> StoreResult<FailedLogin> {
        // SET expressions see the pre-update row, so `login_attempts + 1`
        // is the new count in both assignments.
        let (attempts, lock) = sqlx::query_as::<_, (i32, Option<OffsetDateTime>)>(
            r#"
            UPDATE users
            SET login_attempts = login_attempts + 1,
                lock_until = CASE WHEN login_attempts + 1 >= $2 THEN $3 ELSE lock_until END,
                updated_at = now()
            WHERE id = $1
            RETURNING login_attempts, lock_until
            "#,
        )
        .bind(id)
        .bind(max_attempts)
        .bind(lock_until)
        .fetch_one(&self.pool)
        .await?;
        Ok(FailedLogin {
            attempts,
            lock_until: lock,
        })
    }

    async fn record_successful_login(&self, id: Uuid, now: OffsetDateTime) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET login_attempts = 0, lock_until = NULL, last_login = $2, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn push_token(
        &self,
        id: Uuid,
        token: &str,
        issued_at: OffsetDateTime,
    ) -> StoreResult<()> {
        sqlx::query("INSERT INTO user_tokens (user_id, token, issued_at) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(token)
            .bind(issued_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_token(&self, id: Uuid, token: &str) -> StoreResult<Option<StoredToken>> {
        let row = sqlx::query_as::<_, TokenRow>(
            "SELECT token, issued_at FROM user_tokens WHERE user_id = $1 AND token = $2 LIMIT 1",
        )
        .bind(id)
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(StoredToken::from))
    }

    async fn take_token(&self, id: Uuid, token: &str) -> StoreResult<Option<StoredToken>> {
        let row = sqlx::query_as::<_, TokenRow>(
            "DELETE FROM user_tokens WHERE user_id = $1 AND token = $2 RETURNING token, issued_at",
        )
        .bind(id)
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(StoredToken::from))
    }

    async fn remove_token(&self, id: Uuid, token: &str) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM user_tokens WHERE user_id = $1 AND token = $2")
            .bind(id)
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn remove_all_tokens(&self, id: Uuid) -> StoreResult<u64> {
        let res = sqlx::query("DELETE FROM user_tokens WHERE user_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    async fn remove_tokens_issued_before(&self, cutoff: OffsetDateTime) -> StoreResult<u64> {
        let res = sqlx::query("DELETE FROM user_tokens WHERE issued_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        debug!(removed = res.rows_affected(), "expired token records deleted");
        Ok(res.rows_affected())
    }

    async fn record_api_usage(
        &self,
        id: Uuid,
        now: OffsetDateTime,
        next_reset: OffsetDateTime,
    ) -> StoreResult<Option<ApiUsage>> {
        let row = sqlx::query_as::<_, (i64, i64, Option<OffsetDateTime>, OffsetDateTime)>(
            r#"
            UPDATE users
            SET monthly_requests = CASE WHEN $2 >= usage_reset_at THEN 1
                                        ELSE monthly_requests + 1 END,
                usage_reset_at   = CASE WHEN $2 >= usage_reset_at THEN $3
                                        ELSE usage_reset_at END,
                total_requests   = total_requests + 1,
                last_request_at  = $2
            WHERE id = $1
            RETURNING total_requests, monthly_requests, last_request_at, usage_reset_at
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(next_reset)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(total, monthly, last, reset)| ApiUsage {
            total_requests: total,
            monthly_requests: monthly,
            last_request_at: last,
            reset_date: reset,
        }))
    }

    async fn update_password_hash(&self, id: Uuid, hash: &str) -> StoreResult<()> {
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        profile: &Profile,
        preferences: &Preferences,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE users SET profile = $2, preferences = $3, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(Json(profile))
        .bind(Json(preferences))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> StoreResult<bool> {
        let res = sqlx::query("UPDATE users SET is_active = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
