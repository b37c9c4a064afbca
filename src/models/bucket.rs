//! Represents a logical bucket, a top-level container for objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A storage bucket.
///
/// Buckets are namespaces for objects and map one-to-one onto a directory
/// below `buckets/` in the shared root.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    /// Internal identifier, never exposed in URLs.
    #[serde(skip_serializing)]
    pub id: Uuid,

    /// Unique bucket name (DNS-style naming rules).
    pub name: String,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,
}
