//! Credentials and session tokens.
//!
//! Tokens are `base64url(payload).hex(hmac)` where the payload is the JSON
//! `{"sub": <user id>, "exp": <unix seconds>}` and the MAC is HMAC-SHA256
//! over the encoded payload. Passwords are stored as
//! `pbkdf2-sha256$<iterations>$<salt>$<hex key>` (PBKDF2-HMAC-SHA256, one
//! 32-byte block) and compared in constant time.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use mindflow_core::models::{new_id, User};
use mindflow_core::store::Store;

use crate::error::{ServiceError, ServiceResult};

type HmacSha256 = Hmac<Sha256>;

const MIN_USERNAME_CHARS: usize = 3;
const MAX_USERNAME_CHARS: usize = 50;
const MIN_PASSWORD_CHARS: usize = 6;
const MAX_TOKEN_TTL_SECS: u64 = 366 * 24 * 3600;
const HASH_SCHEME: &str = "pbkdf2-sha256";
const MAX_PASSWORD_ITERATIONS: u32 = 10_000_000;
pub const DEFAULT_PASSWORD_ITERATIONS: u32 = 100_000;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// The user whose credentials these are, if they check out.
    async fn verify(&self, username: &str, password: &str) -> Result<Option<User>>;

    fn issue_token(&self, user: &User, now: DateTime<Utc>) -> Result<String>;

    /// User id carried by a valid, unexpired token.
    fn validate_token(&self, token: &str, now: DateTime<Utc>) -> Option<String>;
}

pub fn hash_password(password: &str, iterations: u32) -> Result<String> {
    let salt = uuid::Uuid::new_v4().simple().to_string();
    let key = pbkdf2_sha256(password, &salt, iterations)?;
    Ok(format!(
        "{HASH_SCHEME}${iterations}${salt}${}",
        hex::encode(key)
    ))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(4, '$');
    let (Some(HASH_SCHEME), Some(iterations), Some(salt), Some(expected)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    let Ok(expected) = hex::decode(expected) else {
        return false;
    };
    match pbkdf2_sha256(password, salt, iterations) {
        Ok(key) => constant_time_eq(&key, &expected),
        Err(_) => false,
    }
}

fn pbkdf2_sha256(password: &str, salt: &str, iterations: u32) -> Result<[u8; 32]> {
    if !(1..=MAX_PASSWORD_ITERATIONS).contains(&iterations) {
        anyhow::bail!("password iterations out of range: {iterations}");
    }
    let prf = HmacSha256::new_from_slice(password.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid password key: {e}"))?;

    let mut mac = prf.clone();
    mac.update(salt.as_bytes());
    mac.update(&1u32.to_be_bytes());
    let mut block = [0u8; 32];
    block.copy_from_slice(&mac.finalize().into_bytes());

    let mut key = block;
    for _ in 1..iterations {
        let mut mac = prf.clone();
        mac.update(&block);
        block.copy_from_slice(&mac.finalize().into_bytes());
        for (k, b) in key.iter_mut().zip(block.iter()) {
            *k ^= b;
        }
    }
    Ok(key)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub struct TokenAuthenticator {
    store: Arc<dyn Store>,
    secret: Vec<u8>,
    ttl: chrono::Duration,
    password_iterations: u32,
}

impl TokenAuthenticator {
    pub fn new(store: Arc<dyn Store>, secret: impl Into<Vec<u8>>, ttl_secs: u64) -> Self {
        Self {
            store,
            secret: secret.into(),
            ttl: chrono::Duration::seconds(ttl_secs.min(MAX_TOKEN_TTL_SECS) as i64),
            password_iterations: DEFAULT_PASSWORD_ITERATIONS,
        }
    }

    pub fn with_password_iterations(mut self, iterations: u32) -> Self {
        self.password_iterations = iterations.clamp(1, MAX_PASSWORD_ITERATIONS);
        self
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| anyhow::anyhow!("invalid token secret: {e}"))
    }

    /// Create an account. Usernames are unique.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        email: Option<&str>,
        now: DateTime<Utc>,
    ) -> ServiceResult<User> {
        let username = check_username(username)?;
        check_password(password)?;
        let email = check_email(email)?;
        if self.store.find_user_credentials(username).await?.is_some() {
            return Err(ServiceError::invalid("username is already taken"));
        }

        let user = User {
            id: new_id(),
            username: username.to_string(),
            email: email.map(str::to_string),
            created_at: now,
        };
        self.store
            .create_user(&user, &hash_password(password, self.password_iterations)?)
            .await?;
        Ok(user)
    }

    /// Change username and/or email. An empty email clears it.
    pub async fn update_profile(
        &self,
        user_id: &str,
        username: Option<&str>,
        email: Option<&str>,
    ) -> ServiceResult<User> {
        let mut user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(ServiceError::NotFound("user"))?;

        if let Some(username) = username {
            let username = check_username(username)?;
            if let Some((other, _)) = self.store.find_user_credentials(username).await? {
                if other.id != user.id {
                    return Err(ServiceError::invalid("username is already taken"));
                }
            }
            user.username = username.to_string();
        }
        if let Some(email) = email {
            user.email = check_email(Some(email))?.map(str::to_string);
        }

        if !self.store.update_user(&user).await? {
            return Err(ServiceError::NotFound("user"));
        }
        Ok(user)
    }

    /// Replace the password after checking the current one.
    pub async fn change_password(
        &self,
        user_id: &str,
        current: &str,
        new: &str,
    ) -> ServiceResult<()> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(ServiceError::NotFound("user"))?;
        let matches = self
            .store
            .find_user_credentials(&user.username)
            .await?
            .is_some_and(|(_, hash)| verify_password(current, &hash));
        if !matches {
            return Err(ServiceError::invalid("current password is incorrect"));
        }
        check_password(new)?;

        let hash = hash_password(new, self.password_iterations)?;
        if !self.store.set_password_hash(user_id, &hash).await? {
            return Err(ServiceError::NotFound("user"));
        }
        Ok(())
    }
}

fn check_username(username: &str) -> ServiceResult<&str> {
    let username = username.trim();
    let chars = username.chars().count();
    if !(MIN_USERNAME_CHARS..=MAX_USERNAME_CHARS).contains(&chars) {
        return Err(ServiceError::invalid(format!(
            "username must be {MIN_USERNAME_CHARS} to {MAX_USERNAME_CHARS} characters"
        )));
    }
    Ok(username)
}

fn check_password(password: &str) -> ServiceResult<()> {
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(ServiceError::invalid(format!(
            "password must be at least {MIN_PASSWORD_CHARS} characters"
        )));
    }
    Ok(())
}

/// Blank means "no email".
fn check_email(email: Option<&str>) -> ServiceResult<Option<&str>> {
    let email = email.map(str::trim).filter(|e| !e.is_empty());
    if email.is_some_and(|e| !e.contains('@')) {
        return Err(ServiceError::invalid("email address is not valid"));
    }
    Ok(email)
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn verify(&self, username: &str, password: &str) -> Result<Option<User>> {
        Ok(self
            .store
            .find_user_credentials(username.trim())
            .await?
            .filter(|(_, hash)| verify_password(password, hash))
            .map(|(user, _)| user))
    }

    fn issue_token(&self, user: &User, now: DateTime<Utc>) -> Result<String> {
        let claims = Claims {
            sub: user.id.clone(),
            exp: (now + self.ttl).timestamp(),
        };
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        Ok(format!(
            "{}.{}",
            payload,
            hex::encode(mac.finalize().into_bytes())
        ))
    }

    fn validate_token(&self, token: &str, now: DateTime<Utc>) -> Option<String> {
        let (payload, signature) = token.split_once('.')?;
        let signature = hex::decode(signature).ok()?;
        let mut mac = self.mac().ok()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature).ok()?;

        let claims: Claims = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).ok()?).ok()?;
        (claims.exp > now.timestamp()).then_some(claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindflow_core::store::memory::InMemoryStore;

    fn authenticator() -> TokenAuthenticator {
        TokenAuthenticator::new(Arc::new(InMemoryStore::new()), "test-secret", 60)
            .with_password_iterations(1_000)
    }

    #[test]
    fn test_password_hash_round_trip() {
        let stored = hash_password("hunter22", 1_000).unwrap();
        assert!(stored.starts_with("pbkdf2-sha256$1000$"));
        assert!(verify_password("hunter22", &stored));
        assert!(!verify_password("hunter23", &stored));
        assert!(!verify_password("hunter22", "plain"));
    }

    #[test]
    fn test_same_password_gets_different_salts() {
        assert_ne!(
            hash_password("secret1", 1_000).unwrap(),
            hash_password("secret1", 1_000).unwrap()
        );
    }

    #[test]
    fn test_pbkdf2_matches_rfc7914_vector() {
        // PBKDF2-HMAC-SHA256, P="passwd", S="salt", c=1, first 32 bytes.
        let key = pbkdf2_sha256("passwd", "salt", 1).unwrap();
        assert_eq!(
            hex::encode(key),
            "55ac046e56e3089fec1691c22544b605f94185216dde0465e68b9d57c20dacbc"
        );
    }

    #[test]
    fn test_iterations_are_read_from_stored_hash() {
        let stored = hash_password("secret1", 2_000).unwrap();
        let tampered = stored.replacen("$2000$", "$1000$", 1);
        assert!(verify_password("secret1", &stored));
        assert!(!verify_password("secret1", &tampered));
        assert!(!verify_password("secret1", "pbkdf2-sha256$0$salt$00"));
        assert!(!verify_password("secret1", "sha256$salt$00"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    #[tokio::test]
    async fn test_change_password_requires_current() {
        let auth = authenticator();
        let user = auth.register("carol", "secret1", None, Utc::now()).await.unwrap();

        assert!(matches!(
            auth.change_password(&user.id, "wrong!", "secret2").await,
            Err(ServiceError::Invalid(_))
        ));
        assert!(matches!(
            auth.change_password(&user.id, "secret1", "123").await,
            Err(ServiceError::Invalid(_))
        ));
        auth.change_password(&user.id, "secret1", "secret2")
            .await
            .unwrap();
        assert!(auth.verify("carol", "secret1").await.unwrap().is_none());
        assert!(auth.verify("carol", "secret2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_profile() {
        let auth = authenticator();
        let now = Utc::now();
        let carol = auth.register("carol", "secret1", Some("c@x.com"), now).await.unwrap();
        auth.register("dave", "secret1", None, now).await.unwrap();

        assert!(matches!(
            auth.update_profile(&carol.id, Some("dave"), None).await,
            Err(ServiceError::Invalid(_))
        ));
        assert!(matches!(
            auth.update_profile(&carol.id, None, Some("not-an-email")).await,
            Err(ServiceError::Invalid(_))
        ));

        let updated = auth
            .update_profile(&carol.id, Some("caroline"), Some(""))
            .await
            .unwrap();
        assert_eq!(updated.username, "caroline");
        assert_eq!(updated.email, None);
        assert!(auth.verify("caroline", "secret1").await.unwrap().is_some());
        assert!(auth.verify("carol", "secret1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_register_then_verify() {
        let auth = authenticator();
        let now = Utc::now();
        let user = auth
            .register("alice", "secret1", Some("a@x.com"), now)
            .await
            .unwrap();
        assert_eq!(
            auth.verify("alice", "secret1").await.unwrap().map(|u| u.id),
            Some(user.id)
        );
        assert!(auth.verify("alice", "wrong!").await.unwrap().is_none());
        assert!(matches!(
            auth.register("alice", "secret1", None, now).await,
            Err(ServiceError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_register_rejects_short_password() {
        let auth = authenticator();
        assert!(matches!(
            auth.register("bob", "123", None, Utc::now()).await,
            Err(ServiceError::Invalid(_))
        ));
    }

    #[test]
    fn test_token_round_trip_and_expiry() {
        let auth = authenticator();
        let now = Utc::now();
        let user = User {
            id: "u1".into(),
            username: "alice".into(),
            email: None,
            created_at: now,
        };
        let token = auth.issue_token(&user, now).unwrap();
        assert_eq!(auth.validate_token(&token, now).as_deref(), Some("u1"));
        assert!(auth
            .validate_token(&token, now + chrono::Duration::seconds(61))
            .is_none());
    }

    #[test]
    fn test_tampered_token_is_rejected() {
        let auth = authenticator();
        let now = Utc::now();
        let user = User {
            id: "u1".into(),
            username: "alice".into(),
            email: None,
            created_at: now,
        };
        let token = auth.issue_token(&user, now).unwrap();
        let (_, sig) = token.split_once('.').unwrap();
        let forged_payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"u2","exp":9999999999}"#);
        assert!(auth
            .validate_token(&format!("{forged_payload}.{sig}"), now)
            .is_none());

        let other = TokenAuthenticator::new(Arc::new(InMemoryStore::new()), "other-secret", 60);
        assert!(other.validate_token(&token, now).is_none());
    }
}
