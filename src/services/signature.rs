//! HMAC request signing for the object API.
//!
//! A signed request carries
//!
//! ```text
//! Authorization: Bearer <accessKeyId>:<base64(HMAC-SHA256(secret, METHOD\nPATH\nTIMESTAMP))>
//! X-Beamdrop-Date: <RFC 3339 timestamp>
//! ```
//!
//! `PATH` is the request path as sent, without the query string.

use crate::{
    models::api_key::KeyPermissions,
    services::key_service::{KeyError, KeyService, hmac_sha256},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Duration, Utc};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, error};

pub const DATE_HEADER: &str = "x-beamdrop-date";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing authorization")]
    MissingCredentials,
    #[error("malformed authorization header")]
    MalformedHeader,
    #[error("missing or invalid X-Beamdrop-Date header")]
    InvalidTimestamp,
    #[error("request timestamp outside the allowed window")]
    StaleRequest,
    #[error("invalid credentials")]
    UnknownKey,
    #[error("invalid credentials")]
    SignatureMismatch,
    #[error("api key is disabled")]
    KeyDisabled,
    #[error("api key has expired")]
    KeyExpired,
    #[error("api key is not allowed to access bucket `{0}`")]
    BucketOutOfScope(String),
    #[error("api key is read-only")]
    ReadOnly,
    #[error("authentication is required")]
    SessionRequired,
    #[error("invalid password")]
    InvalidPassword,
    #[error("authentication backend failure: {0}")]
    Internal(String),
}

impl AuthError {
    /// Short machine label used in logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials => "missing_credentials",
            AuthError::MalformedHeader => "malformed_header",
            AuthError::InvalidTimestamp => "invalid_timestamp",
            AuthError::StaleRequest => "stale_request",
            AuthError::UnknownKey => "unknown_key",
            AuthError::SignatureMismatch => "signature_mismatch",
            AuthError::KeyDisabled => "key_disabled",
            AuthError::KeyExpired => "key_expired",
            AuthError::BucketOutOfScope(_) => "bucket_out_of_scope",
            AuthError::ReadOnly => "read_only",
            AuthError::SessionRequired => "session_required",
            AuthError::InvalidPassword => "invalid_password",
            AuthError::Internal(_) => "internal",
        }
    }
}

impl From<KeyError> for AuthError {
    fn from(err: KeyError) -> Self {
        AuthError::Internal(err.to_string())
    }
}

/// What an authenticated key is allowed to touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGrant {
    pub access_key_id: String,
    pub bucket_scope: Option<String>,
    pub permissions: KeyPermissions,
}

/// Access attached to every object API request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessScope {
    /// API auth is off: everything is allowed.
    Unrestricted,
    Key(KeyGrant),
}

impl AccessScope {
    pub fn allows_bucket(&self, bucket: &str) -> bool {
        match self {
            AccessScope::Unrestricted => true,
            AccessScope::Key(grant) => grant
                .bucket_scope
                .as_deref()
                .is_none_or(|scope| scope == bucket),
        }
    }

    pub fn check_bucket(&self, bucket: &str) -> Result<(), AuthError> {
        if self.allows_bucket(bucket) {
            Ok(())
        } else {
            Err(AuthError::BucketOutOfScope(bucket.to_string()))
        }
    }

    /// Bucket scope plus write permission.
    pub fn check_write(&self, bucket: &str) -> Result<(), AuthError> {
        self.check_bucket(bucket)?;
        match self {
            AccessScope::Key(grant) if grant.permissions == KeyPermissions::ReadOnly => {
                Err(AuthError::ReadOnly)
            }
            _ => Ok(()),
        }
    }

    /// Bucket-level administration (create/delete) needs an unscoped writer.
    pub fn check_admin(&self, bucket: &str) -> Result<(), AuthError> {
        self.check_write(bucket)?;
        match self {
            AccessScope::Key(grant) if grant.bucket_scope.is_some() => {
                Err(AuthError::BucketOutOfScope(bucket.to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Parsed credentials of one request.
#[derive(Debug, Clone)]
pub struct SignedRequest<'a> {
    pub access_key_id: &'a str,
    pub signature: &'a str,
    pub method: &'a str,
    pub path: &'a str,
    pub timestamp: &'a str,
}

/// Split `Bearer <accessKeyId>:<signature>`.
pub fn parse_authorization(value: &str) -> Result<(&str, &str), AuthError> {
    let credentials = value
        .strip_prefix("Bearer ")
        .ok_or(AuthError::MalformedHeader)?
        .trim();
    match credentials.split_once(':') {
        Some((id, sig)) if !id.is_empty() && !sig.is_empty() => Ok((id, sig)),
        _ => Err(AuthError::MalformedHeader),
    }
}

pub fn string_to_sign(method: &str, path: &str, timestamp: &str) -> String {
    format!("{}\n{}\n{}", method.to_ascii_uppercase(), path, timestamp)
}

/// Base64 signature a client sends for the given request.
pub fn compute_signature(secret: &str, method: &str, path: &str, timestamp: &str) -> String {
    let payload = string_to_sign(method, path, timestamp);
    STANDARD.encode(hmac_sha256(secret.as_bytes(), &[payload.as_bytes()]))
}

#[derive(Clone)]
pub struct SignatureVerifier {
    keys: KeyService,
    window: Duration,
}

impl SignatureVerifier {
    pub fn new(keys: KeyService, window: Duration) -> Self {
        Self { keys, window }
    }

    pub async fn authenticate(&self, req: &SignedRequest<'_>) -> Result<KeyGrant, AuthError> {
        self.authenticate_at(req, Utc::now()).await
    }

    /// Verify a request as of `now`.
    ///
    /// Checks run cheapest first: timestamp, key lookup, key state, then
    /// the constant-time signature comparison.
    pub async fn authenticate_at(
        &self,
        req: &SignedRequest<'_>,
        now: DateTime<Utc>,
    ) -> Result<KeyGrant, AuthError> {
        let timestamp = DateTime::parse_from_rfc3339(req.timestamp)
            .map_err(|_| AuthError::InvalidTimestamp)?
            .with_timezone(&Utc);
        if (now - timestamp).abs() > self.window {
            return Err(AuthError::StaleRequest);
        }

        let key = self
            .keys
            .find(req.access_key_id)
            .await?
            .ok_or(AuthError::UnknownKey)?;
        if key.disabled {
            return Err(AuthError::KeyDisabled);
        }
        if key.is_expired_at(now) {
            return Err(AuthError::KeyExpired);
        }

        let secret = self.keys.secret_for(&key).map_err(|err| {
            error!("cannot derive secret for {}: {}", key.access_key_id, err);
            AuthError::from(err)
        })?;
        let payload = string_to_sign(req.method, req.path, req.timestamp);
        let expected = hmac_sha256(secret.as_bytes(), &[payload.as_bytes()]);
        let provided = STANDARD
            .decode(req.signature)
            .map_err(|_| AuthError::SignatureMismatch)?;
        if !bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
            debug!("signature mismatch for {}", key.access_key_id);
            return Err(AuthError::SignatureMismatch);
        }

        self.keys.touch_last_used(key.id, now).await;
        Ok(KeyGrant {
            access_key_id: key.access_key_id,
            bucket_scope: key.bucket_scope,
            permissions: key.permissions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_header_parsing() {
        assert_eq!(
            parse_authorization("Bearer BDK_ABC:c2ln").unwrap(),
            ("BDK_ABC", "c2ln")
        );
        assert_eq!(
            parse_authorization("Basic abc"),
            Err(AuthError::MalformedHeader)
        );
        assert_eq!(
            parse_authorization("Bearer BDK_ABC"),
            Err(AuthError::MalformedHeader)
        );
        assert_eq!(
            parse_authorization("Bearer :sig"),
            Err(AuthError::MalformedHeader)
        );
    }

    #[test]
    fn string_to_sign_layout() {
        assert_eq!(
            string_to_sign("get", "/api/v1/buckets", "2025-01-01T00:00:00Z"),
            "GET\n/api/v1/buckets\n2025-01-01T00:00:00Z"
        );
    }

    #[test]
    fn scope_rules() {
        let scoped = AccessScope::Key(KeyGrant {
            access_key_id: "BDK_X".into(),
            bucket_scope: Some("photos".into()),
            permissions: KeyPermissions::ReadOnly,
        });
        assert!(scoped.check_bucket("photos").is_ok());
        assert_eq!(
            scoped.check_bucket("docs"),
            Err(AuthError::BucketOutOfScope("docs".into()))
        );
        assert_eq!(scoped.check_write("photos"), Err(AuthError::ReadOnly));
        assert!(AccessScope::Unrestricted.check_admin("any").is_ok());
    }
}
