//! API key store.
//!
//! Secrets are never written to disk. Each key stores a random nonce from
//! which the server re-derives the secret with its master key
//! (HMAC-SHA256), plus a SHA-256 of the secret to confirm the derivation.

use crate::{
    models::api_key::{ApiKey, CreatedApiKey, KeyPermissions},
    utils::paths,
};
use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::{Rng, RngCore, distributions::Alphanumeric, rngs::OsRng};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::{path::Path, sync::Arc};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

pub const ACCESS_KEY_PREFIX: &str = "BDK_";
const ACCESS_KEY_RANDOM_LEN: usize = 20;
const MAX_KEY_NAME_LEN: usize = 128;

const KEY_COLUMNS: &str = "id, name, access_key_id, secret_hash, secret_nonce, permissions, \
                           bucket_scope, expires_at, last_used_at, created_at, disabled";

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("api key `{0}` not found")]
    NotFound(String),
    #[error("stored secret for `{0}` does not match the master key")]
    SecretMismatch(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Server-wide secret used to derive per-key signing secrets.
pub struct MasterKey([u8; 32]);

impl MasterKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Load the hex-encoded key at `path`, creating it (mode 0600) on first run.
    pub async fn load_or_create(path: &Path) -> Result<Self> {
        match fs::read_to_string(path).await {
            Ok(contents) => {
                let bytes = hex::decode(contents.trim())
                    .with_context(|| format!("decoding master key {}", path.display()))?;
                let bytes: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("master key {} has wrong length", path.display()))?;
                Ok(Self(bytes))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let key = Self::generate();
                fs::write(path, hex::encode(key.0))
                    .await
                    .with_context(|| format!("writing master key {}", path.display()))?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
                }
                info!("generated new master key at {}", path.display());
                Ok(key)
            }
            Err(err) => {
                Err(err).with_context(|| format!("reading master key {}", path.display()))
            }
        }
    }

    fn derive_secret(&self, access_key_id: &str, nonce: &str) -> String {
        let digest = hmac_sha256(
            &self.0,
            &[
                b"beamdrop-secret:".as_slice(),
                access_key_id.as_bytes(),
                b":".as_slice(),
                nonce.as_bytes(),
            ],
        );
        URL_SAFE_NO_PAD.encode(digest)
    }
}

/// HMAC-SHA256 over the concatenation of `parts`.
pub(crate) fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().to_vec()
}

fn secret_hash(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

fn generate_access_key_id() -> String {
    let suffix: String = OsRng
        .sample_iter(&Alphanumeric)
        .map(|b| (b as char).to_ascii_uppercase())
        .take(ACCESS_KEY_RANDOM_LEN)
        .collect();
    format!("{}{}", ACCESS_KEY_PREFIX, suffix)
}

fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Input for `KeyService::create_key`.
#[derive(Debug, Clone, Default)]
pub struct NewApiKey {
    pub name: String,
    pub bucket_scope: Option<String>,
    pub expires_in_secs: Option<i64>,
    pub permissions: KeyPermissions,
}

#[derive(Clone)]
pub struct KeyService {
    db: Arc<SqlitePool>,
    master: Arc<MasterKey>,
}

impl KeyService {
    pub fn new(db: Arc<SqlitePool>, master: MasterKey) -> Self {
        Self {
            db,
            master: Arc::new(master),
        }
    }

    pub async fn create_key(&self, req: NewApiKey) -> Result<CreatedApiKey, KeyError> {
        self.create_key_at(req, Utc::now()).await
    }

    pub async fn create_key_at(
        &self,
        req: NewApiKey,
        now: DateTime<Utc>,
    ) -> Result<CreatedApiKey, KeyError> {
        let name = req.name.trim().to_string();
        if name.is_empty() || name.chars().count() > MAX_KEY_NAME_LEN {
            return Err(KeyError::InvalidInput(format!(
                "key name must be 1 to {} characters",
                MAX_KEY_NAME_LEN
            )));
        }
        let bucket_scope = req.bucket_scope.filter(|scope| !scope.is_empty());
        if let Some(scope) = &bucket_scope {
            paths::validate_bucket_name(scope)
                .map_err(|err| KeyError::InvalidInput(err.to_string()))?;
        }
        let expires_at = match req.expires_in_secs {
            None => None,
            Some(secs) if secs > 0 => Some(now + Duration::seconds(secs)),
            Some(_) => {
                return Err(KeyError::InvalidInput(
                    "expiresIn must be a positive number of seconds".into(),
                ));
            }
        };

        let access_key_id = generate_access_key_id();
        let nonce = generate_nonce();
        let secret = self.master.derive_secret(&access_key_id, &nonce);

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO api_keys (name, access_key_id, secret_hash, secret_nonce, permissions, \
             bucket_scope, expires_at, created_at, disabled) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0) RETURNING id",
        )
        .bind(&name)
        .bind(&access_key_id)
        .bind(secret_hash(&secret))
        .bind(&nonce)
        .bind(req.permissions)
        .bind(&bucket_scope)
        .bind(expires_at)
        .bind(now)
        .fetch_one(&*self.db)
        .await?;

        info!("created api key {} ({})", access_key_id, name);
        Ok(CreatedApiKey {
            id,
            name,
            access_key_id,
            secret_key: secret,
            permissions: req.permissions,
            bucket_scope,
            expires_at,
            created_at: now,
        })
    }

    pub async fn list_keys(&self) -> Result<Vec<ApiKey>, KeyError> {
        let sql = format!("SELECT {} FROM api_keys ORDER BY created_at DESC", KEY_COLUMNS);
        Ok(sqlx::query_as::<_, ApiKey>(&sql)
            .fetch_all(&*self.db)
            .await?)
    }

    pub async fn find(&self, access_key_id: &str) -> Result<Option<ApiKey>, KeyError> {
        let sql = format!("SELECT {} FROM api_keys WHERE access_key_id = ?", KEY_COLUMNS);
        Ok(sqlx::query_as::<_, ApiKey>(&sql)
            .bind(access_key_id)
            .fetch_optional(&*self.db)
            .await?)
    }

    /// Re-derive the signing secret and confirm it against the stored hash.
    pub fn secret_for(&self, key: &ApiKey) -> Result<String, KeyError> {
        let secret = self.master.derive_secret(&key.access_key_id, &key.secret_nonce);
        let matches: bool = secret_hash(&secret)
            .as_bytes()
            .ct_eq(key.secret_hash.as_bytes())
            .into();
        if matches {
            Ok(secret)
        } else {
            Err(KeyError::SecretMismatch(key.access_key_id.clone()))
        }
    }

    pub async fn delete_key(&self, access_key_id: &str) -> Result<(), KeyError> {
        let result = sqlx::query("DELETE FROM api_keys WHERE access_key_id = ?")
            .bind(access_key_id)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(KeyError::NotFound(access_key_id.to_string()));
        }
        info!("deleted api key {}", access_key_id);
        Ok(())
    }

    pub async fn set_disabled(&self, access_key_id: &str, disabled: bool) -> Result<ApiKey, KeyError> {
        let sql = format!(
            "UPDATE api_keys SET disabled = ? WHERE access_key_id = ? RETURNING {}",
            KEY_COLUMNS
        );
        sqlx::query_as::<_, ApiKey>(&sql)
            .bind(disabled)
            .bind(access_key_id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| KeyError::NotFound(access_key_id.to_string()))
    }

    /// Best effort: a lost update under contention is acceptable.
    pub async fn touch_last_used(&self, id: i64, at: DateTime<Utc>) {
        if let Err(err) = sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(&*self.db)
            .await
        {
            warn!("failed to record last use of api key {}: {}", id, err);
        }
    }
}
