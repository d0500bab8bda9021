use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use super::model::{Preferences, Profile};

pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 50;
pub const PASSWORD_MIN: usize = 6;
pub const PASSWORD_MAX: usize = 128;
pub const BIO_MAX: usize = 500;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Rejected input, with every offending field listed.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
    pub fields: Vec<FieldError>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(field: &'static str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            message: message.clone(),
            fields: vec![FieldError { field, message }],
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        if self.fields.is_empty() {
            None
        } else {
            serde_json::to_value(&self.fields).ok()
        }
    }
}

#[derive(Default)]
struct Collector(Vec<FieldError>);

impl Collector {
    fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(FieldError {
            field,
            message: message.into(),
        });
    }

    fn finish(self) -> Result<(), ValidationError> {
        if self.0.is_empty() {
            return Ok(());
        }
        let message = if self.0.len() == 1 {
            self.0[0].message.clone()
        } else {
            "Validation failed".to_string()
        };
        Err(ValidationError {
            message,
            fields: self.0,
        })
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex =
            Regex::new(r"^\w+([.-]?\w+)*@\w+([.-]?\w+)*(\.\w{2,3})+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn check_username(c: &mut Collector, username: &str) {
    let len = username.chars().count();
    if len < USERNAME_MIN {
        c.push("username", "Username must be at least 3 characters long");
    } else if len > USERNAME_MAX {
        c.push("username", "Username must not exceed 50 characters");
    }
}

fn check_password(c: &mut Collector, field: &'static str, password: &str) {
    let len = password.chars().count();
    if len < PASSWORD_MIN {
        c.push(field, "Password must be at least 6 characters long");
    } else if len > PASSWORD_MAX {
        c.push(field, "Password must not exceed 128 characters");
    }
}

fn check_profile(c: &mut Collector, profile: &Profile) {
    if let Some(bio) = &profile.bio {
        if bio.chars().count() > BIO_MAX {
            c.push("profile.bio", "Bio must not exceed 500 characters");
        }
    }
}

/// Validated and normalised registration fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub profile: Profile,
}

pub fn validate_registration(
    username: &str,
    email: &str,
    password: &str,
    profile: Option<Profile>,
) -> Result<Registration, ValidationError> {
    let username = username.trim().to_string();
    let email = normalize_email(email);
    let profile = normalize_profile(profile.unwrap_or_default());

    let mut c = Collector::default();
    check_username(&mut c, &username);
    if email.is_empty() {
        c.push("email", "Email is required");
    } else if !is_valid_email(&email) {
        c.push("email", "Please enter a valid email");
    }
    check_password(&mut c, "password", password);
    check_profile(&mut c, &profile);
    c.finish()?;

    Ok(Registration {
        username,
        email,
        password: password.to_string(),
        profile,
    })
}

pub fn validate_password(field: &'static str, password: &str) -> Result<(), ValidationError> {
    let mut c = Collector::default();
    check_password(&mut c, field, password);
    c.finish()
}

pub fn validate_profile(profile: Profile) -> Result<Profile, ValidationError> {
    let profile = normalize_profile(profile);
    let mut c = Collector::default();
    check_profile(&mut c, &profile);
    c.finish()?;
    Ok(profile)
}

/// Collapses duplicate topics, keeping first occurrence order.
pub fn normalize_preferences(mut prefs: Preferences) -> Preferences {
    let mut seen = Vec::with_capacity(prefs.favorite_astronomy_topics.len());
    prefs.favorite_astronomy_topics.retain(|t| {
        if seen.contains(t) {
            false
        } else {
            seen.push(*t);
            true
        }
    });
    prefs
}

fn normalize_profile(profile: Profile) -> Profile {
    fn trimmed(v: Option<String>) -> Option<String> {
        v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
    }
    Profile {
        first_name: trimmed(profile.first_name),
        last_name: trimmed(profile.last_name),
        avatar: profile.avatar,
        bio: profile.bio,
    }
}
