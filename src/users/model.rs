use serde::{Deserialize, Serialize};
use time::{Date, Duration, Month, OffsetDateTime, Time};
use uuid::Uuid;

/// A stored refresh token stays usable for this long after issuance,
/// whatever the expiry embedded in the JWT itself says.
pub const TOKEN_RECORD_TTL: Duration = Duration::seconds(604_800);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    Apod,
    MarsRovers,
    Neo,
    EarthImagery,
    Epic,
}

/// Free-form display fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default)]
    pub favorite_astronomy_topics: Vec<Topic>,
    #[serde(default = "default_notifications")]
    pub notifications_enabled: bool,
}

fn default_notifications() -> bool {
    true
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            favorite_astronomy_topics: Vec::new(),
            notifications_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiUsage {
    pub total_requests: i64,
    pub monthly_requests: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_request_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub reset_date: OffsetDateTime,
}

impl ApiUsage {
    pub fn fresh(now: OffsetDateTime) -> Self {
        Self {
            total_requests: 0,
            monthly_requests: 0,
            last_request_at: None,
            reset_date: next_month_start(now),
        }
    }

    /// Applies one request at `now`, resetting the monthly counter first if
    /// `now` has reached the stored boundary.
    pub fn apply_request(&mut self, now: OffsetDateTime, next_reset: OffsetDateTime) {
        if now >= self.reset_date {
            self.monthly_requests = 0;
            self.reset_date = next_reset;
        }
        self.total_requests += 1;
        self.monthly_requests += 1;
        self.last_request_at = Some(now);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredToken {
    pub token: String,
    pub issued_at: OffsetDateTime,
}

impl StoredToken {
    pub fn is_live(&self, now: OffsetDateTime) -> bool {
        token_is_live(self.issued_at, now)
    }
}

/// User aggregate as held by the credential store.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub profile: Profile,
    pub preferences: Preferences,
    pub api_usage: ApiUsage,
    pub tokens: Vec<StoredToken>,
    pub last_login: Option<OffsetDateTime>,
    pub login_attempts: i32,
    pub lock_until: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    pub fn is_locked(&self, now: OffsetDateTime) -> bool {
        matches!(self.lock_until, Some(until) if until > now)
    }

    /// A lock whose expiry has passed; cleared before the next password check.
    pub fn has_expired_lock(&self, now: OffsetDateTime) -> bool {
        matches!(self.lock_until, Some(until) if until <= now)
    }
}

/// Input for `UserStore::create`. Values are already validated and the
/// password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub profile: Profile,
    pub preferences: Preferences,
}

pub fn token_is_live(issued_at: OffsetDateTime, now: OffsetDateTime) -> bool {
    now < issued_at + TOKEN_RECORD_TTL
}

/// Midnight UTC on the first day of the month after `now`.
pub fn next_month_start(now: OffsetDateTime) -> OffsetDateTime {
    let now = now.to_offset(time::UtcOffset::UTC);
    let (year, month) = match now.month() {
        Month::December => (now.year() + 1, Month::January),
        m => (now.year(), m.next()),
    };
    // Day 1 exists in every month.
    let date = Date::from_calendar_date(year, month, 1).unwrap_or(now.date());
    date.with_time(Time::MIDNIGHT).assume_utc()
}
