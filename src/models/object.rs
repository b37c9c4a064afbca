//! Represents an object (file) stored in a bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata for a single object within a bucket.
///
/// The payload lives on disk at `buckets/{bucket}/{key}`; this row is the
/// source of truth for size, content type and ETag.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Object {
    #[serde(skip_serializing)]
    pub id: Uuid,

    #[serde(skip_serializing)]
    pub bucket_id: Uuid,

    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Content type (MIME type) supplied at upload time.
    pub content_type: Option<String>,

    /// Size in bytes.
    #[serde(rename = "size")]
    pub size_bytes: i64,

    /// Hex MD5 of the payload.
    pub etag: String,

    /// Timestamp when object was last written.
    pub last_modified: DateTime<Utc>,
}

impl Object {
    pub fn content_type_or_default(&self) -> &str {
        self.content_type
            .as_deref()
            .unwrap_or("application/octet-stream")
    }
}
