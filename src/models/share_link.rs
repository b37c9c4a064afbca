//! Shareable link records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Clone, FromRow, Debug)]
pub struct ShareLink {
    pub id: i64,
    /// Target path relative to the shared root.
    pub path: String,
    pub token: String,
    pub password_hash: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub access_count: i64,
    pub created_at: DateTime<Utc>,
}

impl ShareLink {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now > expires)
    }
}

/// Management view; the password hash never leaves the server.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ShareLinkView {
    pub id: i64,
    pub path: String,
    pub token: String,
    pub has_password: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub access_count: i64,
    pub created_at: DateTime<Utc>,
}

impl From<ShareLink> for ShareLinkView {
    fn from(link: ShareLink) -> Self {
        Self {
            id: link.id,
            has_password: link.password_hash.is_some(),
            path: link.path,
            token: link.token,
            expires_at: link.expires_at,
            access_count: link.access_count,
            created_at: link.created_at,
        }
    }
}
