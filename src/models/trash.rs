//! Trash entries for soft-deleted files, directories and objects.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Serialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TrashEntry {
    pub id: Uuid,
    /// Location before deletion, relative to the shared root.
    pub original_path: String,
    /// File name inside the trash directory.
    pub trashed_name: String,
    pub is_dir: bool,
    #[serde(rename = "size")]
    pub size_bytes: i64,
    pub deleted_at: DateTime<Utc>,
    /// Set when the entry was an object; restoring re-creates its metadata.
    pub bucket: Option<String>,
    pub object_key: Option<String>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
}

/// Object metadata carried into the trash alongside the payload.
#[derive(Clone, Debug)]
pub struct TrashedObject {
    pub bucket: String,
    pub key: String,
    pub content_type: Option<String>,
    pub etag: String,
}
