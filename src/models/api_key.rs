//! API key records used for HMAC request signing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// What a key may do once authenticated.
#[derive(Serialize, Deserialize, sqlx::Type, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum KeyPermissions {
    #[default]
    ReadWrite,
    ReadOnly,
}

/// Stored key row. The secret itself is never persisted; `secret_nonce`
/// lets the server re-derive it from the master key and `secret_hash`
/// confirms the derivation.
#[derive(Clone, FromRow, Debug)]
pub struct ApiKey {
    pub id: i64,
    pub name: String,
    pub access_key_id: String,
    pub secret_hash: String,
    pub secret_nonce: String,
    pub permissions: KeyPermissions,
    pub bucket_scope: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub disabled: bool,
}

impl ApiKey {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now > expires)
    }
}

/// Public view of a key, as listed by `GET /api/v1/keys`.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyView {
    pub id: i64,
    pub name: String,
    pub access_key_id: String,
    pub permissions: KeyPermissions,
    pub bucket_scope: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub disabled: bool,
    pub expired: bool,
}

impl From<ApiKey> for ApiKeyView {
    fn from(key: ApiKey) -> Self {
        let expired = key.is_expired_at(Utc::now());
        Self {
            id: key.id,
            name: key.name,
            access_key_id: key.access_key_id,
            permissions: key.permissions,
            bucket_scope: key.bucket_scope,
            expires_at: key.expires_at,
            last_used_at: key.last_used_at,
            created_at: key.created_at,
            disabled: key.disabled,
            expired,
        }
    }
}

/// Returned once, at creation time. This is the only place the secret
/// ever leaves the server.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreatedApiKey {
    pub id: i64,
    pub name: String,
    pub access_key_id: String,
    pub secret_key: String,
    pub permissions: KeyPermissions,
    pub bucket_scope: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
