//! Directory listing entries for the filesystem browser and share pages.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    /// Human readable size (`"-"` for directories).
    pub size: String,
    pub size_bytes: u64,
    pub mod_time: DateTime<Utc>,
    pub is_dir: bool,
    /// Path relative to the listing root.
    pub path: String,
}
