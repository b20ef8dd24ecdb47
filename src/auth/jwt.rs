use std::time::Duration;

use jsonwebtoken::{
    decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::config::JwtConfig;

/// JWT payload. Never stored server-side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: Uuid,     // user id
    pub email: String, // login handle at issue time
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("no bearer token presented")]
    Missing,
    #[error("token is malformed or its signature is invalid")]
    Malformed,
    #[error("token has expired")]
    Expired,
}

/// Signing and verification keys, built once from config at startup.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::from_secs((cfg.ttl_minutes.max(0) as u64) * 60),
        }
    }

    pub fn issue(&self, user_id: Uuid, email: &str) -> anyhow::Result<String> {
        self.issue_at(user_id, email, OffsetDateTime::now_utc())
    }

    pub(crate) fn issue_at(
        &self,
        user_id: Uuid,
        email: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<String> {
        let exp = now + TimeDuration::seconds(self.ttl.as_secs() as i64);
        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            iat: now.unix_timestamp().max(0) as usize,
            exp: exp.unix_timestamp().max(0) as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user_id, "jwt signed");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            }
        })?;
        debug!(user_id = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }
}

/// Token from a `Bearer <token>` header value. `None` for anything else.
pub fn extract_bearer(header: Option<&str>) -> Option<&str> {
    let header = header?.trim();
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
pub(crate) fn test_keys(secret: &str, issuer: &str, audience: &str) -> JwtKeys {
    JwtKeys::from_config(&JwtConfig {
        secret: secret.into(),
        issuer: issuer.into(),
        audience: audience.into(),
        ttl_minutes: 60 * 24,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_and_verify_roundtrip() {
        let keys = test_keys("dev-secret", "test-issuer", "test-aud");
        let user_id = Uuid::new_v4();
        let token = keys.issue(user_id, "buyer@example.com").expect("issue");
        let claims = keys.verify(&token).expect("verify token");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.email, "buyer@example.com");
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.exp - claims.iat, 24 * 60 * 60);
    }

    #[test]
    fn expired_token_is_distinguished() {
        let keys = test_keys("dev-secret", "iss", "aud");
        let issued = OffsetDateTime::now_utc() - TimeDuration::hours(25);
        let token = keys.issue_at(Uuid::new_v4(), "a@b.com", issued).unwrap();
        assert_eq!(keys.verify(&token).unwrap_err(), TokenError::Expired);
    }

    #[test]
    fn token_just_inside_ttl_is_valid() {
        let keys = test_keys("dev-secret", "iss", "aud");
        let issued = OffsetDateTime::now_utc() - TimeDuration::hours(23);
        let token = keys.issue_at(Uuid::new_v4(), "a@b.com", issued).unwrap();
        assert!(keys.verify(&token).is_ok());
    }

    #[test]
    fn tampered_or_foreign_tokens_are_malformed() {
        let keys = test_keys("dev-secret", "iss", "aud");
        let token = keys.issue(Uuid::new_v4(), "a@b.com").unwrap();

        let other = test_keys("other-secret", "iss", "aud");
        assert_eq!(other.verify(&token).unwrap_err(), TokenError::Malformed);

        let wrong_aud = test_keys("dev-secret", "iss", "elsewhere");
        assert_eq!(wrong_aud.verify(&token).unwrap_err(), TokenError::Malformed);

        assert_eq!(keys.verify("not.a.jwt").unwrap_err(), TokenError::Malformed);
        let mut tampered = token.clone();
        tampered.push('x');
        assert_eq!(keys.verify(&tampered).unwrap_err(), TokenError::Malformed);
    }

    #[test]
    fn bearer_extraction() {
        assert_eq!(extract_bearer(Some("Bearer abc.def")), Some("abc.def"));
        assert_eq!(extract_bearer(Some("bearer  abc ")), Some("abc"));
        assert_eq!(extract_bearer(Some("Basic dXNlcjpwdw==")), None);
        assert_eq!(extract_bearer(Some("Bearer")), None);
        assert_eq!(extract_bearer(Some("Bearer   ")), None);
        assert_eq!(extract_bearer(None), None);
    }
}
