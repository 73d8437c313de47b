use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const HASH_ROUNDS: u32 = 10_000;

pub const SESSION_COOKIE: &str = "pdfchat_session";

/// Salted, iterated SHA-256. Returns `(hash, salt)`, both hex.
pub fn hash_password(password: &str) -> (String, String) {
    let salt = Uuid::new_v4().simple().to_string();
    let hash = digest_with_salt(password, &salt);
    (hash, salt)
}

pub fn verify_password(password: &str, salt: &str, expected_hash: &str) -> bool {
    let actual = digest_with_salt(password, salt);
    constant_time_eq(actual.as_bytes(), expected_hash.as_bytes())
}

fn digest_with_salt(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    let mut digest = hasher.finalize();

    for _ in 1..HASH_ROUNDS {
        let mut hasher = Sha256::new();
        hasher.update(digest);
        hasher.update(salt.as_bytes());
        digest = hasher.finalize();
    }

    format!("{:x}", digest)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated { username: String },
}

#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub created_at: DateTime<Utc>,
}

impl Session {
    fn is_expired(&self, ttl: Duration) -> bool {
        (Utc::now() - self.created_at)
            .to_std()
            .is_ok_and(|age| age >= ttl)
    }
}

/// In-memory session table for the UI. Lost on restart; entries older than `ttl` are
/// treated as logged out and pruned.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    pub fn login(&self, username: &str) -> Result<String> {
        let token = Uuid::new_v4().simple().to_string();
        let session = Session {
            username: username.to_string(),
            created_at: Utc::now(),
        };

        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| anyhow::anyhow!("lock poisoned"))?;
        sessions.retain(|_, existing| !existing.is_expired(self.ttl));
        sessions.insert(token.clone(), session);

        Ok(token)
    }

    pub fn logout(&self, token: &str) -> Result<bool> {
        let removed = self
            .sessions
            .lock()
            .map_err(|_| anyhow::anyhow!("lock poisoned"))?
            .remove(token);
        Ok(removed.is_some())
    }

    pub fn state(&self, token: Option<&str>) -> Result<SessionState> {
        let Some(token) = token else {
            return Ok(SessionState::Unauthenticated);
        };

        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| anyhow::anyhow!("lock poisoned"))?;

        let Some(session) = sessions.get(token) else {
            return Ok(SessionState::Unauthenticated);
        };
        if !session.is_expired(self.ttl) {
            return Ok(SessionState::Authenticated {
                username: session.username.clone(),
            });
        }

        sessions.remove(token);
        Ok(SessionState::Unauthenticated)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self
            .sessions
            .lock()
            .map_err(|_| anyhow::anyhow!("lock poisoned"))?
            .len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Pulls the session token out of a raw `Cookie` header value.
pub fn session_token_from_cookie(header: &str) -> Option<&str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

pub fn session_cookie(token: &str) -> String {
    format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax")
}

pub fn expired_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[test]
    fn password_roundtrip_and_rejection() {
        let (hash, salt) = hash_password("hunter2");
        assert!(verify_password("hunter2", &salt, &hash));
        assert!(!verify_password("hunter3", &salt, &hash));
        assert!(!hash.contains("hunter2"));
    }

    #[test]
    fn same_password_gets_different_salts() {
        let (first, salt_a) = hash_password("pw");
        let (second, salt_b) = hash_password("pw");
        assert_ne!(salt_a, salt_b);
        assert_ne!(first, second);
    }

    #[test]
    fn logout_returns_to_unauthenticated() {
        let store = SessionStore::new(DAY);
        let token = store.login("alice").unwrap();
        assert_eq!(
            store.state(Some(&token)).unwrap(),
            SessionState::Authenticated {
                username: "alice".to_string()
            }
        );

        assert!(store.logout(&token).unwrap());
        assert_eq!(
            store.state(Some(&token)).unwrap(),
            SessionState::Unauthenticated
        );
        assert!(!store.logout(&token).unwrap());
    }

    #[test]
    fn unknown_or_missing_token_is_unauthenticated() {
        let store = SessionStore::new(DAY);
        assert_eq!(store.state(None).unwrap(), SessionState::Unauthenticated);
        assert_eq!(
            store.state(Some("nope")).unwrap(),
            SessionState::Unauthenticated
        );
    }

    #[test]
    fn expired_sessions_are_dropped() {
        let store = SessionStore::new(Duration::ZERO);
        let first = store.login("alice").unwrap();
        assert_eq!(
            store.state(Some(&first)).unwrap(),
            SessionState::Unauthenticated
        );
        assert!(store.is_empty().unwrap());

        store.login("bob").unwrap();
        store.login("carol").unwrap();
        // each login prunes whatever already expired
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn cookie_header_parsing() {
        let header = format!("theme=dark; {SESSION_COOKIE}=abc123; other=1");
        assert_eq!(session_token_from_cookie(&header), Some("abc123"));
        assert_eq!(session_token_from_cookie("theme=dark"), None);
        assert_eq!(
            session_token_from_cookie(&format!("{SESSION_COOKIE}=")),
            None
        );
    }
}
