//! Soft delete: entries move into `.beamdrop_trash/` and are tracked in
//! SQLite so they can be listed, restored to their original location, or
//! purged for good.

use crate::{
    models::trash::{TrashEntry, TrashedObject},
    services::storage_service::{StorageError, StorageResult},
    utils::paths,
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{fs, sync::Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

const TRASH_COLUMNS: &str = "id, original_path, trashed_name, is_dir, size_bytes, deleted_at, \
                             bucket, object_key, content_type, etag";

#[derive(Clone)]
pub struct TrashService {
    db: Arc<SqlitePool>,
    root: PathBuf,
    trash_dir: PathBuf,
    /// Serializes name selection so two deletes never claim the same slot.
    placement: Arc<Mutex<()>>,
}

impl TrashService {
    pub fn new(db: Arc<SqlitePool>, root: impl Into<PathBuf>, trash_dir: impl Into<PathBuf>) -> Self {
        Self {
            db,
            root: root.into(),
            trash_dir: trash_dir.into(),
            placement: Arc::new(Mutex::new(())),
        }
    }

    /// Move `source` into the trash and record where it came from.
    ///
    /// `original_path` is relative to the shared root. When `object` is set
    /// the entry also remembers the object's metadata for a later restore.
    pub async fn trash_path(
        &self,
        source: &Path,
        original_path: &str,
        object: Option<TrashedObject>,
    ) -> StorageResult<TrashEntry> {
        let meta = fs::symlink_metadata(source).await.map_err(|err| match err.kind() {
            ErrorKind::NotFound => StorageError::PathNotFound(original_path.to_string()),
            _ => StorageError::from(err),
        })?;
        let size_bytes = if meta.is_dir() {
            dir_size(source).await?
        } else {
            meta.len()
        };

        let _placement = self.placement.lock().await;
        let trashed_name = self.free_name(paths::file_name_of(original_path)).await?;
        let target = self.trash_dir.join(&trashed_name);
        fs::rename(source, &target).await?;

        let (bucket, object_key, content_type, etag) = match object {
            Some(obj) => (Some(obj.bucket), Some(obj.key), obj.content_type, Some(obj.etag)),
            None => (None, None, None, None),
        };
        let entry = TrashEntry {
            id: Uuid::new_v4(),
            original_path: original_path.to_string(),
            trashed_name,
            is_dir: meta.is_dir(),
            size_bytes: size_bytes as i64,
            deleted_at: Utc::now(),
            bucket,
            object_key,
            content_type,
            etag,
        };

        let inserted = sqlx::query(
            "INSERT INTO trash_entries (id, original_path, trashed_name, is_dir, size_bytes, \
             deleted_at, bucket, object_key, content_type, etag) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id)
        .bind(&entry.original_path)
        .bind(&entry.trashed_name)
        .bind(entry.is_dir)
        .bind(entry.size_bytes)
        .bind(entry.deleted_at)
        .bind(&entry.bucket)
        .bind(&entry.object_key)
        .bind(&entry.content_type)
        .bind(&entry.etag)
        .execute(&*self.db)
        .await;

        if let Err(err) = inserted {
            if let Err(undo_err) = fs::rename(&target, source).await {
                warn!(
                    "trashed {} but could not record or undo it: {}",
                    original_path, undo_err
                );
            }
            return Err(StorageError::Sqlx(err));
        }

        debug!("moved {} to trash as {}", original_path, entry.trashed_name);
        Ok(entry)
    }

    /// First free name for `base`: as-is, then with a deletion timestamp,
    /// then with a numeric suffix on top.
    async fn free_name(&self, base: &str) -> StorageResult<String> {
        if !self.name_taken(base).await? {
            return Ok(base.to_string());
        }

        let path = Path::new(base);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| base.to_string());
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");

        let stamped = format!("{}_{}{}", stem, stamp, ext);
        if !self.name_taken(&stamped).await? {
            return Ok(stamped);
        }
        let mut n = 1u32;
        loop {
            let candidate = format!("{}_{}_{}{}", stem, stamp, n, ext);
            if !self.name_taken(&candidate).await? {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    async fn name_taken(&self, name: &str) -> StorageResult<bool> {
        if fs::try_exists(self.trash_dir.join(name)).await? {
            return Ok(true);
        }
        let row: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM trash_entries WHERE trashed_name = ?")
                .bind(name)
                .fetch_optional(&*self.db)
                .await?;
        Ok(row.is_some())
    }

    pub async fn list(&self) -> StorageResult<Vec<TrashEntry>> {
        let sql = format!(
            "SELECT {} FROM trash_entries ORDER BY deleted_at DESC",
            TRASH_COLUMNS
        );
        Ok(sqlx::query_as::<_, TrashEntry>(&sql)
            .fetch_all(&*self.db)
            .await?)
    }

    pub async fn get(&self, id: Uuid) -> StorageResult<TrashEntry> {
        let sql = format!("SELECT {} FROM trash_entries WHERE id = ?", TRASH_COLUMNS);
        sqlx::query_as::<_, TrashEntry>(&sql)
            .bind(id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| StorageError::TrashEntryNotFound(id.to_string()))
    }

    /// Move an entry back to its original location. Never overwrites.
    ///
    /// Object metadata is not touched here; the object store wraps this to
    /// recreate it.
    pub async fn restore(&self, id: Uuid) -> StorageResult<TrashEntry> {
        let entry = self.get(id).await?;
        let target = paths::join_relative(&self.root, &entry.original_path);
        if fs::try_exists(&target).await? {
            return Err(StorageError::AlreadyExists(entry.original_path));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let trashed = self.trash_dir.join(&entry.trashed_name);
        fs::rename(&trashed, &target).await.map_err(|err| match err.kind() {
            ErrorKind::NotFound => StorageError::TrashEntryNotFound(id.to_string()),
            _ => StorageError::from(err),
        })?;

        if let Err(err) = sqlx::query("DELETE FROM trash_entries WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await
        {
            if let Err(undo_err) = fs::rename(&target, &trashed).await {
                warn!("restored {} but could not undo: {}", entry.original_path, undo_err);
            }
            return Err(StorageError::Sqlx(err));
        }

        debug!("restored {} from trash", entry.original_path);
        Ok(entry)
    }

    /// Permanently delete an entry.
    pub async fn purge(&self, id: Uuid) -> StorageResult<TrashEntry> {
        let entry = self.get(id).await?;
        let trashed = self.trash_dir.join(&entry.trashed_name);
        let removed = if entry.is_dir {
            fs::remove_dir_all(&trashed).await
        } else {
            fs::remove_file(&trashed).await
        };
        match removed {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        sqlx::query("DELETE FROM trash_entries WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(entry)
    }
}

/// Total size of regular files below `dir`.
async fn dir_size(dir: &Path) -> StorageResult<u64> {
    let mut total = 0;
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                total += entry.metadata().await?.len();
            }
        }
    }
    Ok(total)
}
