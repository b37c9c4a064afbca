//! Core data models.
//!
//! Rows map onto SQLite tables via `sqlx::FromRow`; the `*View` types are
//! the JSON shapes handed to clients.

pub mod api_key;
pub mod bucket;
pub mod file_entry;
pub mod object;
pub mod share_link;
pub mod trash;
