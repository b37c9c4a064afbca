//! src/services/storage_service.rs
//!
//! StorageService: bucket and object operations backed by SQLite for
//! metadata and the local disk for payloads, laid out as
//! `buckets/{bucket}/{key}` beneath the shared root so the file browser sees
//! the same tree the object API writes.

use crate::{
    models::{bucket::Bucket, object::Object, trash::TrashEntry, trash::TrashedObject},
    services::{
        locks::{KeyLocks, object_lock_key},
        trash_service::TrashService,
    },
    utils::{
        atomic::{self, StagedFile, TempPath},
        paths::{self, BUCKETS_DIR_NAME, PathError},
    },
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::fs::{self, File};
use tracing::{debug, warn};
use uuid::Uuid;

pub const MAX_LIST_KEYS: usize = 1000;
const LIST_BATCH: usize = 256;

#[derive(Clone, Debug, Default)]
pub struct ListObjectsParams {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub continuation_token: Option<String>,
    pub start_after: Option<String>,
    pub max_keys: usize,
}

#[derive(Debug)]
pub struct ListObjectsResult {
    pub objects: Vec<Object>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
    pub key_count: usize,
    pub max_keys: usize,
}

/// Errors shared by the object store, the filesystem API and the trash.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{0}` is not empty")]
    BucketNotEmpty(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("`{0}` not found")]
    PathNotFound(String),
    #[error("`{0}` already exists")]
    AlreadyExists(String),
    #[error("{0}")]
    Conflict(String),
    #[error("`{0}` is managed by the server and cannot be modified here")]
    ReadOnlyPath(String),
    #[error("trash entry `{0}` not found")]
    TrashEntryNotFound(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("upload exceeds the configured size limit")]
    TooLarge,
    #[error(transparent)]
    InvalidPath(#[from] PathError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        if err.kind() == ErrorKind::FileTooLarge {
            StorageError::TooLarge
        } else {
            StorageError::Io(err)
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Position a listing resumes from: after an object key, or after every
/// key sharing a common prefix that was already returned.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ListCursor {
    Key(String),
    Prefix(String),
}

impl ListCursor {
    fn encode(&self) -> String {
        let raw = match self {
            ListCursor::Key(key) => format!("k:{}", key),
            ListCursor::Prefix(prefix) => format!("p:{}", prefix),
        };
        URL_SAFE_NO_PAD.encode(raw)
    }

    fn decode(token: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(token).ok()?;
        let raw = String::from_utf8(bytes).ok()?;
        match raw.split_at_checked(2)? {
            ("k:", key) => Some(ListCursor::Key(key.to_string())),
            ("p:", prefix) => Some(ListCursor::Prefix(prefix.to_string())),
            _ => None,
        }
    }
}

/// StorageService provides the S3-like operations:
/// - bucket create / list / delete (only when empty)
/// - streaming object upload with write-to-temp + rename
/// - object read with a consistent metadata/file pairing
/// - ListObjectsV2-style listing with delimiter grouping and cursors
/// - delete into the trash, and restore from it
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// `buckets/` directory on disk.
    pub base_path: PathBuf,

    tmp_dir: PathBuf,
    locks: KeyLocks,
    trash: TrashService,
    max_upload_bytes: Option<u64>,
}

impl StorageService {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        tmp_dir: impl Into<PathBuf>,
        locks: KeyLocks,
        trash: TrashService,
        max_upload_bytes: Option<u64>,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            tmp_dir: tmp_dir.into(),
            locks,
            trash,
            max_upload_bytes,
        }
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        paths::join_relative(&self.bucket_root(bucket_name), key)
    }

    /// Object location relative to the shared root, as recorded in the trash.
    fn shared_path(bucket_name: &str, key: &str) -> String {
        format!("{}/{}/{}", BUCKETS_DIR_NAME, bucket_name, key)
    }

    async fn fetch_bucket(&self, bucket: &str) -> StorageResult<Bucket> {
        paths::validate_bucket_name(bucket)?;
        sqlx::query_as::<_, Bucket>("SELECT id, name, created_at FROM buckets WHERE name = ?")
            .bind(bucket)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => StorageError::BucketNotFound(bucket.to_string()),
                other => StorageError::Sqlx(other),
            })
    }

    async fn fetch_object(&self, bucket: &Bucket, key: &str) -> StorageResult<Object> {
        sqlx::query_as::<_, Object>(
            "SELECT id, bucket_id, key, content_type, size_bytes, etag, last_modified
             FROM objects WHERE bucket_id = ? AND key = ?",
        )
        .bind(bucket.id)
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ObjectNotFound {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            },
            other => StorageError::Sqlx(other),
        })
    }

    pub async fn list_buckets(&self) -> StorageResult<Vec<Bucket>> {
        let buckets =
            sqlx::query_as::<_, Bucket>("SELECT id, name, created_at FROM buckets ORDER BY name")
                .fetch_all(&*self.db)
                .await?;
        Ok(buckets)
    }

    /// Create a bucket and its directory. A repeat create is a conflict.
    pub async fn create_bucket(&self, name: &str) -> StorageResult<Bucket> {
        paths::validate_bucket_name(name)?;

        let bucket = Bucket {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
        };

        match sqlx::query("INSERT INTO buckets (id, name, created_at) VALUES (?, ?, ?)")
            .bind(bucket.id)
            .bind(&bucket.name)
            .bind(bucket.created_at)
            .execute(&*self.db)
            .await
        {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(StorageError::BucketAlreadyExists(name.to_string()));
            }
            Err(err) => return Err(StorageError::Sqlx(err)),
        }

        if let Err(err) = fs::create_dir_all(self.bucket_root(name)).await {
            sqlx::query("DELETE FROM buckets WHERE id = ?")
                .bind(bucket.id)
                .execute(&*self.db)
                .await?;
            return Err(err.into());
        }

        debug!("created bucket {}", name);
        Ok(bucket)
    }

    /// Delete an empty bucket from metadata and disk.
    pub async fn delete_bucket(&self, name: &str) -> StorageResult<()> {
        let bucket = self.fetch_bucket(name).await?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM objects WHERE bucket_id = ?")
            .bind(bucket.id)
            .fetch_one(&*self.db)
            .await?;
        if count > 0 {
            return Err(StorageError::BucketNotEmpty(name.to_string()));
        }

        sqlx::query("DELETE FROM buckets WHERE id = ?")
            .bind(bucket.id)
            .execute(&*self.db)
            .await?;

        let bucket_path = self.bucket_root(name);
        if let Err(err) = fs::remove_dir_all(&bucket_path).await {
            if err.kind() != ErrorKind::NotFound {
                warn!(
                    "failed to remove bucket directory {} after delete: {}",
                    bucket_path.display(),
                    err
                );
            }
        }
        Ok(())
    }

    /// Stream-upload an object.
    ///
    /// The body goes to a temp file (MD5 and size computed on the way), is
    /// fsynced, then swapped into place together with the metadata upsert
    /// under the key's commit lock. The swap runs in its own task so a client
    /// that disconnects mid-commit cannot leave the key half-replaced.
    pub async fn put_object_stream<S>(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        stream: S,
    ) -> StorageResult<Object>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        paths::validate_object_key(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let writer = self.locks.writer(&object_lock_key(bucket, key)).await;
        let staged = atomic::stage_stream(&self.tmp_dir, stream, self.max_upload_bytes).await?;

        let service = self.clone();
        let key = key.to_string();
        let task = tokio::spawn(async move {
            let commit = writer.commit().await;
            let result = service
                .commit_object(&bucket_rec, &key, content_type, staged)
                .await;
            drop(commit);
            drop(writer);
            result
        });
        task.await.map_err(|err| StorageError::Io(io::Error::other(err)))?
    }

    pub async fn put_object_bytes(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        content: Bytes,
    ) -> StorageResult<Object> {
        let stream = futures::stream::once(async move { Ok(content) });
        self.put_object_stream(bucket, key, content_type, stream)
            .await
    }

    async fn commit_object(
        &self,
        bucket: &Bucket,
        key: &str,
        content_type: Option<String>,
        staged: StagedFile,
    ) -> StorageResult<Object> {
        let target = self.object_path(&bucket.name, key);
        let parent = target.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::other("object path missing parent directory"))
        })?;
        fs::create_dir_all(&parent)
            .await
            .map_err(|err| key_collision(err, key))?;

        // Park the current payload until the new metadata is durable.
        let backup = match fs::metadata(&target).await {
            Ok(meta) if meta.is_dir() => {
                return Err(StorageError::Conflict(format!(
                    "key `{}` collides with an existing prefix",
                    key
                )));
            }
            Ok(_) => {
                let backup = TempPath::file_in(&self.tmp_dir);
                fs::rename(&target, backup.path()).await?;
                Some(backup)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };

        if let Err(err) = staged.temp.persist_into(&target).await {
            restore_backup(backup, &target).await;
            return Err(err.into());
        }

        let upsert = sqlx::query_as::<_, Object>(
            r#"
            INSERT INTO objects (id, bucket_id, key, content_type, size_bytes, etag, last_modified)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING id, bucket_id, key, content_type, size_bytes, etag, last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bucket.id)
        .bind(key)
        .bind(content_type)
        .bind(staged.size as i64)
        .bind(&staged.etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match upsert {
            // Dropping the backup guard deletes the old payload.
            Ok(object) => Ok(object),
            Err(err) => {
                if let Err(remove_err) = fs::remove_file(&target).await {
                    warn!("failed to remove {}: {}", target.display(), remove_err);
                }
                restore_backup(backup, &target).await;
                Err(StorageError::Sqlx(err))
            }
        }
    }

    /// Open an object for reading.
    ///
    /// Metadata and file handle are taken under the key's shared commit lock,
    /// so they always describe the same version. The handle keeps that
    /// version readable even if a writer replaces it afterwards.
    pub async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<(Object, File)> {
        paths::validate_object_key(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let _read = self.locks.reader(&object_lock_key(bucket, key)).await;
        let object = self.fetch_object(&bucket_rec, key).await?;
        let file = File::open(self.object_path(bucket, key))
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => StorageError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                },
                _ => StorageError::Io(err),
            })?;
        Ok((object, file))
    }

    pub async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<Object> {
        paths::validate_object_key(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.fetch_object(&bucket_rec, key).await
    }

    /// List objects following ListObjectsV2 rules.
    ///
    /// Keys are scanned in byte order from the cursor. With a delimiter,
    /// keys sharing a prefix up to the first delimiter after `prefix`
    /// collapse into one common prefix; `max_keys` counts both kinds of
    /// entry and the returned token resumes right after the last one.
    pub async fn list_objects(
        &self,
        bucket: &str,
        params: ListObjectsParams,
    ) -> StorageResult<ListObjectsResult> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let max_keys = params.max_keys.clamp(1, MAX_LIST_KEYS);
        let prefix = params.prefix.unwrap_or_default();
        let delimiter = params.delimiter.filter(|d| !d.is_empty());

        let mut cursor = params.start_after;
        let mut skip_prefix: Option<String> = None;
        if let Some(token) = params.continuation_token.as_deref() {
            match ListCursor::decode(token) {
                Some(ListCursor::Key(key)) => cursor = Some(key),
                Some(ListCursor::Prefix(group)) => {
                    cursor = Some(group.clone());
                    skip_prefix = Some(group);
                }
                None => {
                    return Err(StorageError::InvalidInput(
                        "invalid continuation token".into(),
                    ));
                }
            }
        }

        let mut objects = Vec::new();
        let mut common_prefixes: Vec<String> = Vec::new();
        let mut last_entry: Option<ListCursor> = None;
        let mut is_truncated = false;

        'scan: loop {
            let rows = self
                .fetch_page(&bucket_rec, &prefix, cursor.as_deref())
                .await?;
            let exhausted = rows.len() < LIST_BATCH;

            for obj in rows {
                cursor = Some(obj.key.clone());
                if skip_prefix
                    .as_deref()
                    .is_some_and(|group| obj.key.starts_with(group))
                {
                    continue;
                }

                if objects.len() + common_prefixes.len() == max_keys {
                    is_truncated = true;
                    break 'scan;
                }

                let group = delimiter
                    .as_deref()
                    .and_then(|delim| compute_common_prefix(&obj.key, &prefix, delim));
                match group {
                    Some(group) => {
                        skip_prefix = Some(group.clone());
                        last_entry = Some(ListCursor::Prefix(group.clone()));
                        common_prefixes.push(group);
                    }
                    None => {
                        last_entry = Some(ListCursor::Key(obj.key.clone()));
                        objects.push(obj);
                    }
                }
            }

            if exhausted {
                break;
            }
        }

        let next_continuation_token = if is_truncated {
            last_entry.map(|entry| entry.encode())
        } else {
            None
        };
        let key_count = objects.len() + common_prefixes.len();

        Ok(ListObjectsResult {
            objects,
            common_prefixes,
            is_truncated,
            next_continuation_token,
            key_count,
            max_keys,
        })
    }

    async fn fetch_page(
        &self,
        bucket: &Bucket,
        prefix: &str,
        after: Option<&str>,
    ) -> StorageResult<Vec<Object>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, bucket_id, key, content_type, size_bytes, etag, last_modified \
             FROM objects WHERE bucket_id = ",
        );
        builder.push_bind(bucket.id);

        if !prefix.is_empty() {
            builder.push(" AND key >= ");
            builder.push_bind(prefix.to_string());
            builder.push(" AND substr(key, 1, ");
            builder.push_bind(prefix.chars().count() as i64);
            builder.push(") = ");
            builder.push_bind(prefix.to_string());
        }
        if let Some(after) = after {
            builder.push(" AND key > ");
            builder.push_bind(after.to_string());
        }

        builder.push(" ORDER BY key ASC LIMIT ");
        builder.push_bind(LIST_BATCH as i64);

        Ok(builder.build_query_as().fetch_all(&*self.db).await?)
    }

    /// Move an object into the trash and drop its metadata row.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<TrashEntry> {
        paths::validate_object_key(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let writer = self.locks.writer(&object_lock_key(bucket, key)).await;
        let _commit = writer.commit().await;
        let object = self.fetch_object(&bucket_rec, key).await?;

        let file_path = self.object_path(bucket, key);
        let entry = self
            .trash
            .trash_path(
                &file_path,
                &Self::shared_path(bucket, key),
                Some(TrashedObject {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    content_type: object.content_type.clone(),
                    etag: object.etag.clone(),
                }),
            )
            .await?;

        if let Err(err) = sqlx::query("DELETE FROM objects WHERE id = ?")
            .bind(object.id)
            .execute(&*self.db)
            .await
        {
            if let Err(restore_err) = self.trash.restore(entry.id).await {
                warn!(
                    "object {}/{} left in trash after failed delete: {}",
                    bucket, key, restore_err
                );
            }
            return Err(StorageError::Sqlx(err));
        }

        if let Some(parent) = file_path.parent() {
            prune_empty_dirs(parent, &self.bucket_root(bucket)).await;
        }
        Ok(entry)
    }

    /// Put a trashed object back at its key and recreate its metadata.
    pub async fn restore_object(&self, entry: &TrashEntry) -> StorageResult<Object> {
        let (Some(bucket), Some(key)) = (entry.bucket.as_deref(), entry.object_key.as_deref())
        else {
            return Err(StorageError::InvalidInput(
                "trash entry is not an object".into(),
            ));
        };
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let writer = self.locks.writer(&object_lock_key(bucket, key)).await;
        let _commit = writer.commit().await;
        match self.fetch_object(&bucket_rec, key).await {
            Ok(_) => {
                return Err(StorageError::AlreadyExists(format!("{}/{}", bucket, key)));
            }
            Err(StorageError::ObjectNotFound { .. }) => {}
            Err(err) => return Err(err),
        }

        let restored = self.trash.restore(entry.id).await?;
        let inserted = sqlx::query_as::<_, Object>(
            "INSERT INTO objects (id, bucket_id, key, content_type, size_bytes, etag, last_modified)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING id, bucket_id, key, content_type, size_bytes, etag, last_modified",
        )
        .bind(Uuid::new_v4())
        .bind(bucket_rec.id)
        .bind(key)
        .bind(&restored.content_type)
        .bind(restored.size_bytes)
        .bind(restored.etag.clone().unwrap_or_default())
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match inserted {
            Ok(object) => Ok(object),
            Err(err) => {
                let file_path = self.object_path(bucket, key);
                let object = TrashedObject {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    content_type: restored.content_type.clone(),
                    etag: restored.etag.clone().unwrap_or_default(),
                };
                if let Err(retrash_err) = self
                    .trash
                    .trash_path(&file_path, &restored.original_path, Some(object))
                    .await
                {
                    warn!(
                        "restored payload {}/{} has no metadata: {}",
                        bucket, key, retrash_err
                    );
                }
                Err(StorageError::Sqlx(err))
            }
        }
    }

    /// Object count and total payload bytes.
    pub async fn usage(&self) -> StorageResult<(i64, i64)> {
        let usage = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM objects",
        )
        .fetch_one(&*self.db)
        .await?;
        Ok(usage)
    }
}

async fn restore_backup(backup: Option<TempPath>, target: &Path) {
    if let Some(backup) = backup {
        if let Err(err) = backup.persist(target).await {
            warn!(
                "failed to restore previous payload for {}: {}",
                target.display(),
                err
            );
        }
    }
}

/// A key whose parent segment is already an object (or vice versa).
fn key_collision(err: io::Error, key: &str) -> StorageError {
    match err.kind() {
        ErrorKind::NotADirectory | ErrorKind::AlreadyExists => StorageError::Conflict(format!(
            "key `{}` collides with an existing object",
            key
        )),
        _ => StorageError::Io(err),
    }
}

/// Recursively remove empty directories up to (not including) `stop`.
pub(crate) async fn prune_empty_dirs(start: &Path, stop: &Path) {
    let mut current = start.to_path_buf();
    while current.starts_with(stop) && current != stop {
        match fs::remove_dir(&current).await {
            Ok(_) => match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            },
            Err(err) if err.kind() == ErrorKind::NotFound => break,
            Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
            Err(err) => {
                debug!("failed to prune directory {}: {}", current.display(), err);
                break;
            }
        }
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// Compute the common prefix a key rolls up into, if any.
fn compute_common_prefix(key: &str, prefix: &str, delimiter: &str) -> Option<String> {
    let rest = key.strip_prefix(prefix)?;
    let pos = rest.find(delimiter)?;
    Some(format!("{}{}", prefix, &rest[..pos + delimiter.len()]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_prefix_groups_after_requested_prefix() {
        assert_eq!(
            compute_common_prefix("images/thumb/b.jpg", "images/", "/"),
            Some("images/thumb/".to_string())
        );
        assert_eq!(compute_common_prefix("images/a.jpg", "images/", "/"), None);
        assert_eq!(
            compute_common_prefix("docs/c.txt", "", "/"),
            Some("docs/".to_string())
        );
        assert_eq!(compute_common_prefix("docs/c.txt", "images/", "/"), None);
    }

    #[test]
    fn cursor_tokens_are_typed() {
        let key = ListCursor::Key("a/b.txt".into());
        let prefix = ListCursor::Prefix("a/".into());
        assert_eq!(ListCursor::decode(&key.encode()), Some(key));
        assert_eq!(ListCursor::decode(&prefix.encode()), Some(prefix));
        assert_eq!(ListCursor::decode("not base64!"), None);
    }
}
