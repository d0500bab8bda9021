use std::time::Duration;

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::claims::{AccessClaims, RefreshClaims, TokenKind};
use crate::{config::JwtConfig, users::User};

/// Signing and verification keys; access and refresh tokens use separate
/// secrets so one can never be replayed as the other.
#[derive(Clone)]
pub struct JwtKeys {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl From<&JwtConfig> for JwtKeys {
    fn from(cfg: &JwtConfig) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(cfg.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(cfg.refresh_secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access_ttl: Duration::from_secs((cfg.ttl_minutes.max(1) as u64) * 60),
            refresh_ttl: Duration::from_secs((cfg.refresh_ttl_minutes.max(1) as u64) * 60),
        }
    }
}

fn window(ttl: Duration) -> (usize, usize) {
    let now = OffsetDateTime::now_utc();
    let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
    (now.unix_timestamp() as usize, exp.unix_timestamp() as usize)
}

impl JwtKeys {
    fn validation(&self) -> Validation {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation
    }

    fn decode_with<T: DeserializeOwned>(&self, token: &str, key: &DecodingKey) -> anyhow::Result<T> {
        Ok(decode::<T>(token, key, &self.validation())?.claims)
    }

    fn encode_with<T: Serialize>(&self, claims: &T, key: &EncodingKey) -> anyhow::Result<String> {
        Ok(encode(&Header::default(), claims, key)?)
    }

    pub fn sign_access(&self, user: &User) -> anyhow::Result<String> {
        let (iat, exp) = window(self.access_ttl);
        let claims = AccessClaims {
            sub: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind: TokenKind::Access,
        };
        let token = self.encode_with(&claims, &self.access_encoding)?;
        debug!(user_id = %user.id, kind = ?TokenKind::Access, "jwt signed");
        Ok(token)
    }

    pub fn sign_refresh(&self, user_id: Uuid) -> anyhow::Result<String> {
        let (iat, exp) = window(self.refresh_ttl);
        let claims = RefreshClaims {
            sub: user_id,
            jti: Uuid::new_v4(),
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind: TokenKind::Refresh,
        };
        let token = self.encode_with(&claims, &self.refresh_encoding)?;
        debug!(user_id = %user_id, kind = ?TokenKind::Refresh, "jwt signed");
        Ok(token)
    }

    pub fn verify_access(&self, token: &str) -> anyhow::Result<AccessClaims> {
        let claims: AccessClaims = self.decode_with(token, &self.access_decoding)?;
        if claims.kind != TokenKind::Access {
            anyhow::bail!("not an access token");
        }
        debug!(user_id = %claims.sub, "access jwt verified");
        Ok(claims)
    }

    pub fn verify_refresh(&self, token: &str) -> anyhow::Result<RefreshClaims> {
        let claims: RefreshClaims = self.decode_with(token, &self.refresh_decoding)?;
        if claims.kind != TokenKind::Refresh {
            anyhow::bail!("not a refresh token");
        }
        debug!(user_id = %claims.sub, "refresh jwt verified");
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::{ApiUsage, Preferences, Profile, Role};

    fn make_keys(secret: &str, issuer: &str, audience: &str) -> JwtKeys {
        JwtKeys::from(&JwtConfig {
            secret: secret.into(),
            refresh_secret: format!("{secret}-refresh"),
            issuer: issuer.into(),
            audience: audience.into(),
            ttl_minutes: 5,
            refresh_ttl_minutes: 60,
        })
    }

    fn user() -> User {
        let now = OffsetDateTime::now_utc();
        User {
            id: Uuid::new_v4(),
            username: "voyager".into(),
            email: "voyager@example.com".into(),
            password_hash: String::new(),
            role: Role::Admin,
            is_active: true,
            profile: Profile::default(),
            preferences: Preferences::default(),
            api_usage: ApiUsage::fresh(now),
            tokens: vec![],
            last_login: None,
            login_attempts: 0,
            lock_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn access_token_embeds_identity() {
        let keys = make_keys("dev-secret", "test-issuer", "test-aud");
        let u = user();
        let token = keys.sign_access(&u).expect("sign access");
        let claims = keys.verify_access(&token).expect("verify token");
        assert_eq!(claims.sub, u.id);
        assert_eq!(claims.username, "voyager");
        assert_eq!(claims.email, "voyager@example.com");
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.kind, TokenKind::Access);
        assert_eq!(claims.exp - claims.iat, 5 * 60);
    }

    #[test]
    fn refresh_tokens_are_unique_and_typed() {
        let keys = make_keys("dev-secret", "iss", "aud");
        let id = Uuid::new_v4();
        let a = keys.sign_refresh(id).expect("sign refresh");
        let b = keys.sign_refresh(id).expect("sign refresh");
        assert_ne!(a, b);
        let claims = keys.verify_refresh(&a).expect("verify refresh");
        assert_eq!(claims.sub, id);
        assert_eq!(claims.kind, TokenKind::Refresh);
    }

    #[test]
    fn tokens_do_not_cross_secrets() {
        let keys = make_keys("dev-secret", "iss", "aud");
        let access = keys.sign_access(&user()).unwrap();
        let refresh = keys.sign_refresh(Uuid::new_v4()).unwrap();
        assert!(keys.verify_refresh(&access).is_err());
        assert!(keys.verify_access(&refresh).is_err());
    }

    #[test]
    fn verify_rejects_wrong_issuer_or_audience() {
        let good_keys = make_keys("same-secret", "good-iss", "good-aud");
        let bad_keys = make_keys("same-secret", "bad-iss", "bad-aud");
        let token = good_keys.sign_access(&user()).expect("sign access");
        let err = bad_keys.verify_access(&token).unwrap_err();
        assert!(!err.to_string().is_empty());
    }
}
