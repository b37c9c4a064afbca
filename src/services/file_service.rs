//! Filesystem browser operations over the shared root.
//!
//! Paths arrive relative to the shared root and go through `utils::paths`
//! first. Server directories are invisible here and `buckets/` is read-only,
//! since its contents are owned by the object store's metadata.

use crate::{
    models::{file_entry::FileEntry, trash::TrashEntry},
    services::{
        locks::{KeyLocks, ReaderGuard, WriterGuard, object_lock_key},
        storage_service::{StorageError, StorageResult},
        trash_service::TrashService,
    },
    utils::{
        atomic::{self, TempPath},
        human_size,
        paths::{self, BUCKETS_DIR_NAME},
    },
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::fs::{self, File};
use tracing::debug;
use uuid::Uuid;

pub const MAX_SEARCH_RESULTS: usize = 500;

#[derive(Clone)]
pub struct FileService {
    /// Canonical shared root.
    root: PathBuf,
    tmp_dir: PathBuf,
    locks: KeyLocks,
    trash: TrashService,
    max_upload_bytes: Option<u64>,
}

fn not_found(err: io::Error, rel: &str) -> StorageError {
    match err.kind() {
        ErrorKind::NotFound => StorageError::PathNotFound(display_path(rel)),
        _ => StorageError::from(err),
    }
}

fn display_path(rel: &str) -> String {
    format!("/{}", rel)
}

fn join_rel(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

fn lock_key(rel: &str) -> String {
    format!("fs:{}", rel)
}

fn entry_from(name: String, rel: String, meta: &std::fs::Metadata) -> FileEntry {
    let is_dir = meta.is_dir();
    let size_bytes = if is_dir { 0 } else { meta.len() };
    FileEntry {
        name,
        size: if is_dir {
            "-".to_string()
        } else {
            human_size(size_bytes)
        },
        size_bytes,
        mod_time: meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now()),
        is_dir,
        path: rel,
    }
}

impl FileService {
    pub fn new(
        root: impl Into<PathBuf>,
        tmp_dir: impl Into<PathBuf>,
        locks: KeyLocks,
        trash: TrashService,
        max_upload_bytes: Option<u64>,
    ) -> Self {
        Self {
            root: root.into(),
            tmp_dir: tmp_dir.into(),
            locks,
            trash,
            max_upload_bytes,
        }
    }

    fn readable(&self, path: &str) -> StorageResult<String> {
        let rel = paths::normalize_relative(path)?;
        if paths::is_internal(&rel) {
            return Err(StorageError::PathNotFound(display_path(&rel)));
        }
        Ok(rel)
    }

    fn writable(&self, path: &str) -> StorageResult<String> {
        let rel = paths::normalize_non_root(path)?;
        if paths::is_internal(&rel) || paths::top_level(&rel) == BUCKETS_DIR_NAME {
            return Err(StorageError::ReadOnlyPath(display_path(&rel)));
        }
        Ok(rel)
    }

    /// Absolute path for `rel`, refusing anything whose closest existing
    /// ancestor resolves (through symlinks) outside the root.
    async fn contained(&self, rel: &str) -> StorageResult<PathBuf> {
        let abs = paths::join_relative(&self.root, rel);
        let mut probe = abs.as_path();
        loop {
            match fs::canonicalize(probe).await {
                Ok(real) if real.starts_with(&self.root) => return Ok(abs),
                Ok(_) => return Err(StorageError::PathNotFound(display_path(rel))),
                Err(err) if err.kind() == ErrorKind::NotFound => match probe.parent() {
                    Some(parent) if parent.starts_with(&self.root) => probe = parent,
                    _ => return Err(StorageError::PathNotFound(display_path(rel))),
                },
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Commit read lock for a path that names an object payload, so a read
    /// never lands between an overwrite's backup swap and its rename.
    async fn object_read_guard(&self, rel: &str) -> Option<ReaderGuard> {
        let rest = rel.strip_prefix(BUCKETS_DIR_NAME)?.strip_prefix('/')?;
        let (bucket, key) = rest.split_once('/')?;
        Some(self.locks.reader(&object_lock_key(bucket, key)).await)
    }

    async fn exists(abs: &Path) -> StorageResult<bool> {
        Ok(fs::try_exists(abs).await?)
    }

    /// Writer guards for two paths, taken in a fixed order.
    async fn lock_pair(&self, a: &str, b: &str) -> (WriterGuard, WriterGuard) {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        let first = self.locks.writer(&lock_key(first)).await;
        let second = self.locks.writer(&lock_key(second)).await;
        (first, second)
    }

    async fn entry_at(&self, rel: &str, abs: &Path) -> StorageResult<FileEntry> {
        let meta = fs::metadata(abs).await.map_err(|err| not_found(err, rel))?;
        let name = if rel.is_empty() {
            "/".to_string()
        } else {
            paths::file_name_of(rel).to_string()
        };
        Ok(entry_from(name, rel.to_string(), &meta))
    }

    pub async fn stat(&self, path: &str) -> StorageResult<FileEntry> {
        let rel = self.readable(path)?;
        let _read = self.object_read_guard(&rel).await;
        let abs = self.contained(&rel).await?;
        self.entry_at(&rel, &abs).await
    }

    /// Directory listing: directories first, then files, each by name.
    pub async fn list_dir(&self, path: &str) -> StorageResult<Vec<FileEntry>> {
        let rel = self.readable(path)?;
        let abs = self.contained(&rel).await?;
        let meta = fs::metadata(&abs).await.map_err(|err| not_found(err, &rel))?;
        if !meta.is_dir() {
            return Err(StorageError::InvalidInput(format!(
                "`{}` is not a directory",
                display_path(&rel)
            )));
        }

        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&abs).await?;
        while let Some(child) = dir.next_entry().await? {
            let name = child.file_name().to_string_lossy().into_owned();
            let child_rel = join_rel(&rel, &name);
            if paths::is_internal(&child_rel) {
                continue;
            }
            match fs::metadata(child.path()).await {
                Ok(meta) => entries.push(entry_from(name, child_rel, &meta)),
                Err(err) => debug!("skipping unreadable entry {}: {}", child_rel, err),
            }
        }

        entries.sort_by(|a, b| {
            b.is_dir
                .cmp(&a.is_dir)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
        Ok(entries)
    }

    /// Open a regular file for streaming.
    pub async fn open_file(&self, path: &str) -> StorageResult<(FileEntry, File)> {
        let rel = self.readable(path)?;
        let _read = self.object_read_guard(&rel).await;
        let abs = self.contained(&rel).await?;
        let entry = self.entry_at(&rel, &abs).await?;
        if entry.is_dir {
            return Err(StorageError::InvalidInput(format!(
                "`{}` is a directory",
                display_path(&rel)
            )));
        }
        let file = File::open(&abs).await.map_err(|err| not_found(err, &rel))?;
        Ok((entry, file))
    }

    pub async fn mkdir(&self, dir_path: &str) -> StorageResult<FileEntry> {
        let rel = self.writable(dir_path)?;
        let _writer = self.locks.writer(&lock_key(&rel)).await;
        let abs = self.contained(&rel).await?;
        if Self::exists(&abs).await? {
            return Err(StorageError::AlreadyExists(display_path(&rel)));
        }
        fs::create_dir_all(&abs).await.map_err(|err| match err.kind() {
            ErrorKind::NotADirectory | ErrorKind::AlreadyExists => StorageError::Conflict(
                format!("a file blocks directory `{}`", display_path(&rel)),
            ),
            _ => StorageError::from(err),
        })?;
        self.entry_at(&rel, &abs).await
    }

    /// Rename an entry in place. `new_name` is a single path component.
    pub async fn rename(&self, old_path: &str, new_name: &str) -> StorageResult<FileEntry> {
        paths::validate_file_name(new_name)?;
        let src = self.writable(old_path)?;
        let dst = self.writable(&join_rel(paths::parent_of(&src), new_name))?;
        if src == dst {
            return self.stat(&dst).await;
        }

        let _guards = self.lock_pair(&src, &dst).await;
        let src_abs = self.contained(&src).await?;
        let dst_abs = self.contained(&dst).await?;
        if !Self::exists(&src_abs).await? {
            return Err(StorageError::PathNotFound(display_path(&src)));
        }
        if Self::exists(&dst_abs).await? {
            return Err(StorageError::AlreadyExists(display_path(&dst)));
        }
        fs::rename(&src_abs, &dst_abs).await?;
        self.entry_at(&dst, &dst_abs).await
    }

    /// Move `source` to `target`. An existing directory as target receives
    /// the source inside it; any other existing target is a conflict.
    pub async fn move_entry(&self, source: &str, target: &str) -> StorageResult<FileEntry> {
        let (src, dst) = self.resolve_transfer(source, target).await?;

        let _guards = self.lock_pair(&src, &dst).await;
        let src_abs = self.contained(&src).await?;
        let dst_abs = self.contained(&dst).await?;
        if !Self::exists(&src_abs).await? {
            return Err(StorageError::PathNotFound(display_path(&src)));
        }
        if Self::exists(&dst_abs).await? {
            return Err(StorageError::AlreadyExists(display_path(&dst)));
        }
        self.ensure_parent(&dst, &dst_abs).await?;

        match fs::rename(&src_abs, &dst_abs).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::CrossesDevices => {
                let staged = self.stage_copy(&src, &src_abs).await?;
                staged.persist(&dst_abs).await?;
                remove_entry(&src_abs).await?;
            }
            Err(err) => return Err(err.into()),
        }
        self.entry_at(&dst, &dst_abs).await
    }

    /// Copy `source` to `target` (recursively for directories). The copy is
    /// staged in full before it appears at the target.
    pub async fn copy_entry(&self, source: &str, target: &str) -> StorageResult<FileEntry> {
        let (src, dst) = self.resolve_transfer(source, target).await?;

        let _guards = self.lock_pair(&src, &dst).await;
        let src_abs = self.contained(&src).await?;
        let dst_abs = self.contained(&dst).await?;
        if Self::exists(&dst_abs).await? {
            return Err(StorageError::AlreadyExists(display_path(&dst)));
        }
        let staged = self.stage_copy(&src, &src_abs).await?;
        self.ensure_parent(&dst, &dst_abs).await?;
        staged.persist(&dst_abs).await?;
        self.entry_at(&dst, &dst_abs).await
    }

    /// Validate a move/copy pair and settle the final destination path.
    async fn resolve_transfer(&self, source: &str, target: &str) -> StorageResult<(String, String)> {
        let src = self.writable(source)?;
        let mut dst = self.writable(target)?;

        let target_abs = self.contained(&dst).await?;
        if fs::metadata(&target_abs)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
        {
            dst = self.writable(&join_rel(&dst, paths::file_name_of(&src)))?;
        }

        if dst == src || dst.starts_with(&format!("{}/", src)) {
            return Err(StorageError::InvalidInput(format!(
                "cannot move or copy `{}` into itself",
                display_path(&src)
            )));
        }
        Ok((src, dst))
    }

    async fn ensure_parent(&self, rel: &str, abs: &Path) -> StorageResult<()> {
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent).await.map_err(|err| match err.kind() {
                ErrorKind::NotADirectory | ErrorKind::AlreadyExists => StorageError::Conflict(
                    format!("parent of `{}` is not a directory", display_path(rel)),
                ),
                _ => StorageError::from(err),
            })?;
        }
        Ok(())
    }

    async fn stage_copy(&self, rel: &str, abs: &Path) -> StorageResult<TempPath> {
        let meta = fs::metadata(abs).await.map_err(|err| not_found(err, rel))?;
        let staged = if meta.is_dir() {
            atomic::stage_dir_copy(&self.tmp_dir, abs).await?
        } else {
            atomic::stage_file_copy(&self.tmp_dir, abs).await?
        };
        Ok(staged)
    }

    /// Create or replace a text file.
    pub async fn write_file(&self, file_path: &str, content: String) -> StorageResult<FileEntry> {
        let rel = self.writable(file_path)?;
        let _writer = self.locks.writer(&lock_key(&rel)).await;
        let abs = self.contained(&rel).await?;
        if fs::metadata(&abs)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
        {
            return Err(StorageError::Conflict(format!(
                "`{}` is a directory",
                display_path(&rel)
            )));
        }
        self.ensure_parent(&rel, &abs).await?;
        let staged = atomic::stage_bytes(&self.tmp_dir, Bytes::from(content)).await?;
        staged.temp.persist(&abs).await?;
        self.entry_at(&rel, &abs).await
    }

    /// Stream an uploaded file into `dir`, replacing a file of the same name.
    pub async fn upload<S>(&self, dir: &str, file_name: &str, stream: S) -> StorageResult<FileEntry>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        paths::validate_file_name(file_name)?;
        let dir_rel = paths::normalize_relative(dir)?;
        let rel = self.writable(&join_rel(&dir_rel, file_name))?;

        let dir_abs = self.contained(&dir_rel).await?;
        let dir_meta = fs::metadata(&dir_abs)
            .await
            .map_err(|err| not_found(err, &dir_rel))?;
        if !dir_meta.is_dir() {
            return Err(StorageError::InvalidInput(format!(
                "`{}` is not a directory",
                display_path(&dir_rel)
            )));
        }

        let staged = atomic::stage_stream(&self.tmp_dir, stream, self.max_upload_bytes).await?;
        let _writer = self.locks.writer(&lock_key(&rel)).await;
        let abs = self.contained(&rel).await?;
        if fs::metadata(&abs)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
        {
            return Err(StorageError::Conflict(format!(
                "`{}` is a directory",
                display_path(&rel)
            )));
        }
        staged.temp.persist(&abs).await?;
        debug!("uploaded {} ({} bytes)", rel, staged.size);
        self.entry_at(&rel, &abs).await
    }

    /// Move a file or directory into the trash.
    pub async fn trash(&self, source: &str) -> StorageResult<TrashEntry> {
        let rel = self.writable(source)?;
        let _writer = self.locks.writer(&lock_key(&rel)).await;
        let abs = self.contained(&rel).await?;
        self.trash.trash_path(&abs, &rel, None).await
    }

    /// Restore a trashed filesystem entry to where it was.
    pub async fn restore(&self, id: Uuid) -> StorageResult<TrashEntry> {
        let entry = self.trash.get(id).await?;
        let rel = self.writable(&entry.original_path)?;
        let _writer = self.locks.writer(&lock_key(&rel)).await;
        self.contained(&rel).await?;
        self.trash.restore(id).await
    }

    /// Search names below `path`. A query with `*` or `?` is a
    /// case-insensitive wildcard over the whole name; otherwise it is a
    /// case-insensitive substring match.
    pub async fn search(&self, query: &str, path: &str) -> StorageResult<Vec<FileEntry>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(StorageError::InvalidInput("search query is empty".into()));
        }
        let matcher = NameMatcher::new(query);
        let start = self.readable(path)?;
        let start_abs = self.contained(&start).await?;

        let mut results = Vec::new();
        let mut pending = vec![(start, start_abs)];
        'walk: while let Some((rel, abs)) = pending.pop() {
            let mut dir = match fs::read_dir(&abs).await {
                Ok(dir) => dir,
                Err(err) if rel.is_empty() => return Err(not_found(err, &rel)),
                Err(err) => {
                    debug!("search skipping {}: {}", rel, err);
                    continue;
                }
            };
            while let Some(child) = dir.next_entry().await? {
                let name = child.file_name().to_string_lossy().into_owned();
                let child_rel = join_rel(&rel, &name);
                if paths::is_internal(&child_rel) {
                    continue;
                }
                // symlink_metadata: never follow links while walking.
                let Ok(meta) = fs::symlink_metadata(child.path()).await else {
                    continue;
                };
                if meta.is_dir() {
                    pending.push((child_rel.clone(), child.path()));
                }
                if matcher.matches(&name) {
                    results.push(entry_from(name, child_rel, &meta));
                    if results.len() >= MAX_SEARCH_RESULTS {
                        break 'walk;
                    }
                }
            }
        }

        results.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(results)
    }
}

async fn remove_entry(abs: &Path) -> io::Result<()> {
    if fs::symlink_metadata(abs).await?.is_dir() {
        fs::remove_dir_all(abs).await
    } else {
        fs::remove_file(abs).await
    }
}

enum NameMatcher {
    Substring(String),
    Wildcard(Vec<char>),
}

impl NameMatcher {
    fn new(query: &str) -> Self {
        let lowered = query.to_lowercase();
        if lowered.contains(['*', '?']) {
            NameMatcher::Wildcard(lowered.chars().collect())
        } else {
            NameMatcher::Substring(lowered)
        }
    }

    fn matches(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        match self {
            NameMatcher::Substring(needle) => name.contains(needle.as_str()),
            NameMatcher::Wildcard(pattern) => {
                wildcard_match(pattern, &name.chars().collect::<Vec<_>>())
            }
        }
    }
}

/// `*` matches any run, `?` exactly one character.
fn wildcard_match(pattern: &[char], text: &[char]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glob(pattern: &str, text: &str) -> bool {
        NameMatcher::new(pattern).matches(text)
    }

    #[test]
    fn wildcards() {
        assert!(glob("*.txt", "notes.TXT"));
        assert!(glob("re?ort*", "report-2024.pdf"));
        assert!(!glob("*.txt", "notes.txt.bak"));
        assert!(glob("*a*b*", "xxaxxbxx"));
        assert!(!glob("?", ""));
    }

    #[test]
    fn substring_is_case_insensitive() {
        assert!(glob("Port", "report.pdf"));
        assert!(!glob("port", "rep.pdf"));
    }
}
