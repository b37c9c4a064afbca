//! Password sessions for the browser UI.

use crate::services::signature::AuthError;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;

pub const SESSION_COOKIE: &str = "beamdrop_session";

#[derive(Clone)]
pub struct SessionStore {
    password_digest: Option<[u8; 32]>,
    sessions: Arc<DashMap<String, DateTime<Utc>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(password: Option<&str>, ttl: Duration) -> Self {
        Self {
            password_digest: password
                .filter(|p| !p.is_empty())
                .map(|p| Sha256::digest(p.as_bytes()).into()),
            sessions: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Whether a password is configured at all.
    pub fn enabled(&self) -> bool {
        self.password_digest.is_some()
    }

    pub fn login(&self, password: &str) -> Result<String, AuthError> {
        self.login_at(password, Utc::now())
    }

    pub fn login_at(&self, password: &str, now: DateTime<Utc>) -> Result<String, AuthError> {
        let Some(expected) = self.password_digest else {
            return Err(AuthError::SessionRequired);
        };
        // Compare digests so the check does not depend on password length.
        let candidate: [u8; 32] = Sha256::digest(password.as_bytes()).into();
        if !bool::from(candidate.as_slice().ct_eq(expected.as_slice())) {
            return Err(AuthError::InvalidPassword);
        }

        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);
        self.sessions.insert(token.clone(), now + self.ttl);
        Ok(token)
    }

    /// True when no password is configured or the token is live.
    pub fn validate(&self, token: Option<&str>) -> bool {
        self.validate_at(token, Utc::now())
    }

    pub fn validate_at(&self, token: Option<&str>, now: DateTime<Utc>) -> bool {
        if !self.enabled() {
            return true;
        }
        let Some(token) = token else {
            return false;
        };
        let live = self
            .sessions
            .get(token)
            .is_some_and(|expires| now <= *expires);
        if !live {
            self.sessions.remove(token);
        }
        live
    }

    pub fn logout(&self, token: &str) {
        self.sessions.remove(token);
    }

    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, expires| now <= *expires);
        before.saturating_sub(self.sessions.len())
    }
}
