//! Path and name validation shared by every component that touches disk.
//!
//! All user supplied locations (object keys, filesystem paths, share targets,
//! bucket names) pass through here before a `PathBuf` is ever built, so the
//! traversal rules live in exactly one place.

use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MAX_OBJECT_KEY_LEN: usize = 1024;
const MAX_PATH_LEN: usize = 4096;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

/// Top-level directories under the shared root that belong to the server.
pub const DATA_DIR_NAME: &str = ".beamdrop_data";
pub const TRASH_DIR_NAME: &str = ".beamdrop_trash";
pub const LOG_DIR_NAME: &str = ".beamdrop";
pub const BUCKETS_DIR_NAME: &str = "buckets";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path must not be empty")]
    Empty,
    #[error("path is too long")]
    TooLong,
    #[error("path must not contain `..` segments")]
    Traversal,
    #[error("path contains invalid characters")]
    InvalidCharacter,
    #[error("object key must not start with `/`")]
    Absolute,
    #[error("object key must not contain empty or `.` segments")]
    EmptySegment,
    #[error("`{0}` is not a valid file name")]
    InvalidFileName(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: &'static str },
}

fn has_forbidden_bytes(value: &str) -> bool {
    value
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
}

/// Normalize a path relative to the shared root.
///
/// A leading `/` or `./` is re-rooted at the shared directory, repeated
/// separators and `.` segments collapse, and any `..` segment is rejected.
/// Returns `""` for the root itself.
pub fn normalize_relative(input: &str) -> Result<String, PathError> {
    if input.len() > MAX_PATH_LEN {
        return Err(PathError::TooLong);
    }
    if has_forbidden_bytes(input) {
        return Err(PathError::InvalidCharacter);
    }

    let mut segments = Vec::new();
    for segment in input.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(PathError::Traversal),
            other => segments.push(other),
        }
    }
    Ok(segments.join("/"))
}

/// Like [`normalize_relative`] but refuses to resolve to the root.
pub fn normalize_non_root(input: &str) -> Result<String, PathError> {
    let normalized = normalize_relative(input)?;
    if normalized.is_empty() {
        return Err(PathError::Empty);
    }
    Ok(normalized)
}

/// Validate an object key. Keys are stored verbatim, so unlike filesystem
/// paths nothing is collapsed: the key must already be canonical.
pub fn validate_object_key(key: &str) -> Result<(), PathError> {
    if key.is_empty() {
        return Err(PathError::Empty);
    }
    if key.len() > MAX_OBJECT_KEY_LEN {
        return Err(PathError::TooLong);
    }
    if key.starts_with('/') {
        return Err(PathError::Absolute);
    }
    if has_forbidden_bytes(key) {
        return Err(PathError::InvalidCharacter);
    }
    for segment in key.split('/') {
        match segment {
            ".." => return Err(PathError::Traversal),
            "" | "." => return Err(PathError::EmptySegment),
            _ => {}
        }
    }
    Ok(())
}

/// A single path component such as a rename target or an uploaded file name.
pub fn validate_file_name(name: &str) -> Result<(), PathError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || has_forbidden_bytes(name)
    {
        return Err(PathError::InvalidFileName(name.to_string()));
    }
    Ok(())
}

/// Validate bucket name format.
///
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - cannot start/end with dot or hyphen
/// - cannot contain consecutive dots or dot-hyphen patterns
/// - cannot look like an IPv4 address
pub fn validate_bucket_name(name: &str) -> Result<(), PathError> {
    let invalid = |reason| PathError::InvalidBucketName {
        name: name.to_string(),
        reason,
    };

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(invalid("must be between 3 and 63 characters"));
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, dots, and hyphens",
        ));
    }
    if name.starts_with('.') || name.ends_with('.') || name.starts_with('-') || name.ends_with('-')
    {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }
    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(invalid(
            "cannot contain consecutive dots or dot-hyphen combinations",
        ));
    }
    if is_ipv4_like(name) {
        return Err(invalid("must not be formatted like an IP address"));
    }
    Ok(())
}

/// Join an already normalized relative path onto `root`.
pub fn join_relative(root: &Path, relative: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for segment in relative.split('/').filter(|s| !s.is_empty()) {
        path.push(segment);
    }
    path
}

/// First segment of a normalized relative path.
pub fn top_level(relative: &str) -> &str {
    relative.split('/').next().unwrap_or("")
}

/// Server-owned directories that are invisible to the filesystem API.
pub fn is_internal(relative: &str) -> bool {
    matches!(
        top_level(relative),
        DATA_DIR_NAME | TRASH_DIR_NAME | LOG_DIR_NAME
    )
}

/// Parent of a normalized relative path (`""` for top-level entries).
pub fn parent_of(relative: &str) -> &str {
    relative.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

/// Final component of a normalized relative path.
pub fn file_name_of(relative: &str) -> &str {
    relative
        .rsplit_once('/')
        .map(|(_, name)| name)
        .unwrap_or(relative)
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
