//! Public share links for files and directories under the shared root.

use crate::{
    models::{file_entry::FileEntry, share_link::ShareLink},
    services::{
        file_service::FileService,
        storage_service::StorageError,
    },
    utils::paths,
};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use rand::{RngCore, rngs::OsRng};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::File;
use tracing::info;

const TOKEN_BYTES: usize = 32;

const SHARE_COLUMNS: &str = "id, path, token, password_hash, expires_at, access_count, created_at";

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("share link not found")]
    NotFound,
    #[error("share link has expired")]
    Expired,
    #[error("this share is password protected")]
    PasswordRequired,
    #[error("invalid password")]
    WrongPassword,
    #[error("{0}")]
    InvalidInput(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl From<paths::PathError> for ShareError {
    fn from(err: paths::PathError) -> Self {
        ShareError::Storage(StorageError::InvalidPath(err))
    }
}

pub type ShareResult<T> = Result<T, ShareError>;

/// Options for a new link.
#[derive(Debug, Clone, Default)]
pub struct NewShare {
    pub path: String,
    pub password: Option<String>,
    /// Lifetime in (possibly fractional) seconds; `None` never expires.
    pub expires_in_secs: Option<f64>,
}

/// What a successful resolve hands back.
pub enum ResolvedShare {
    Directory {
        link: ShareLink,
        /// Path inside the share (`""` for the shared directory itself).
        path: String,
        files: Vec<FileEntry>,
    },
    File {
        link: ShareLink,
        entry: FileEntry,
        file: File,
    },
}

pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn hash_password(password: &str) -> ShareResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| ShareError::Hash(err.to_string()))
}

fn verify_password(password: &str, hash: &str) -> ShareResult<bool> {
    let parsed = PasswordHash::new(hash).map_err(|err| ShareError::Hash(err.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Run a password hash/verify off the async workers.
async fn blocking<T, F>(f: F) -> ShareResult<T>
where
    F: FnOnce() -> ShareResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| ShareError::Hash(err.to_string()))?
}

#[derive(Clone)]
pub struct ShareService {
    db: Arc<SqlitePool>,
    files: FileService,
}

impl ShareService {
    pub fn new(db: Arc<SqlitePool>, files: FileService) -> Self {
        Self { db, files }
    }

    pub async fn create_link(&self, req: NewShare) -> ShareResult<ShareLink> {
        self.create_link_at(req, Utc::now()).await
    }

    pub async fn create_link_at(&self, req: NewShare, now: DateTime<Utc>) -> ShareResult<ShareLink> {
        let path = paths::normalize_non_root(&req.path)?;
        self.files.stat(&path).await?;

        let expires_at = match req.expires_in_secs {
            None => None,
            Some(secs) if secs.is_finite() && secs > 0.0 => {
                let millis = (secs * 1000.0).round();
                if millis > i64::MAX as f64 {
                    return Err(ShareError::InvalidInput("expiresIn is too large".into()));
                }
                Some(now + Duration::milliseconds((millis as i64).max(1)))
            }
            Some(_) => {
                return Err(ShareError::InvalidInput(
                    "expiresIn must be a positive number of seconds".into(),
                ));
            }
        };

        let password_hash = match req.password.filter(|p| !p.is_empty()) {
            Some(password) => Some(blocking(move || hash_password(&password)).await?),
            None => None,
        };

        let sql = format!(
            "INSERT INTO share_links (path, token, password_hash, expires_at, access_count, created_at) \
             VALUES (?, ?, ?, ?, 0, ?) RETURNING {}",
            SHARE_COLUMNS
        );
        let link = sqlx::query_as::<_, ShareLink>(&sql)
            .bind(&path)
            .bind(generate_token())
            .bind(password_hash)
            .bind(expires_at)
            .bind(now)
            .fetch_one(&*self.db)
            .await?;

        info!("created share link for /{}", link.path);
        Ok(link)
    }

    async fn find(&self, token: &str) -> ShareResult<ShareLink> {
        let sql = format!("SELECT {} FROM share_links WHERE token = ?", SHARE_COLUMNS);
        sqlx::query_as::<_, ShareLink>(&sql)
            .bind(token)
            .fetch_optional(&*self.db)
            .await?
            .ok_or(ShareError::NotFound)
    }

    pub async fn resolve(
        &self,
        token: &str,
        password: Option<&str>,
        sub_path: Option<&str>,
    ) -> ShareResult<ResolvedShare> {
        self.resolve_at(token, password, sub_path, Utc::now()).await
    }

    /// Resolve a token as of `now`.
    ///
    /// Expiry and the password gate are checked before the target is looked
    /// at, so a locked link reveals nothing about what it points to.
    pub async fn resolve_at(
        &self,
        token: &str,
        password: Option<&str>,
        sub_path: Option<&str>,
        now: DateTime<Utc>,
    ) -> ShareResult<ResolvedShare> {
        let mut link = self.find(token).await?;
        if link.is_expired_at(now) {
            return Err(ShareError::Expired);
        }
        if let Some(hash) = link.password_hash.clone() {
            let password = match password {
                Some(p) if !p.is_empty() => p.to_string(),
                _ => return Err(ShareError::PasswordRequired),
            };
            if !blocking(move || verify_password(&password, &hash)).await? {
                return Err(ShareError::WrongPassword);
            }
        }

        let inner = paths::normalize_relative(sub_path.unwrap_or(""))?;
        let target = if inner.is_empty() {
            link.path.clone()
        } else {
            format!("{}/{}", link.path, inner)
        };
        let entry = self.files.stat(&target).await?;

        link.access_count = sqlx::query_scalar(
            "UPDATE share_links SET access_count = access_count + 1 WHERE id = ? RETURNING access_count",
        )
        .bind(link.id)
        .fetch_one(&*self.db)
        .await?;

        if entry.is_dir {
            let base = format!("{}/", link.path);
            let files = self
                .files
                .list_dir(&target)
                .await?
                .into_iter()
                .map(|mut file| {
                    file.path = file
                        .path
                        .strip_prefix(&base)
                        .unwrap_or(&file.path)
                        .to_string();
                    file
                })
                .collect();
            Ok(ResolvedShare::Directory {
                link,
                path: inner,
                files,
            })
        } else {
            let (entry, file) = self.files.open_file(&target).await?;
            Ok(ResolvedShare::File { link, entry, file })
        }
    }

    pub async fn delete_link(&self, token: &str) -> ShareResult<()> {
        let result = sqlx::query("DELETE FROM share_links WHERE token = ?")
            .bind(token)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ShareError::NotFound);
        }
        Ok(())
    }

    pub async fn list_links(&self) -> ShareResult<Vec<ShareLink>> {
        let sql = format!(
            "SELECT {} FROM share_links ORDER BY created_at DESC",
            SHARE_COLUMNS
        );
        Ok(sqlx::query_as::<_, ShareLink>(&sql)
            .fetch_all(&*self.db)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_256_bit_base64url() {
        let token = generate_token();
        assert_eq!(token.len(), 43);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert_ne!(token, generate_token());
    }

    #[test]
    fn password_hashes_verify() {
        let hash = hash_password("secret").unwrap();
        assert!(verify_password("secret", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }
}
