//! Write-to-temp then rename helpers.
//!
//! Every payload lands in a temp file under the data directory first, gets
//! fsynced, and only then is renamed over its destination. The guard removes
//! the temp file when the writer bails out early or its future is dropped.

use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use uuid::Uuid;

/// Owned temp path that is deleted on drop unless persisted.
#[derive(Debug)]
pub struct TempPath {
    path: PathBuf,
    is_dir: bool,
    armed: bool,
}

impl TempPath {
    pub fn file_in(dir: &Path) -> Self {
        Self {
            path: dir.join(format!("{}.part", Uuid::new_v4())),
            is_dir: false,
            armed: true,
        }
    }

    pub fn dir_in(dir: &Path) -> Self {
        Self {
            path: dir.join(format!("{}.dir", Uuid::new_v4())),
            is_dir: true,
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rename onto `target`. On failure the temp entry is still cleaned up.
    pub async fn persist(mut self, target: &Path) -> io::Result<()> {
        fs::rename(&self.path, target).await?;
        self.armed = false;
        Ok(())
    }

    /// Like `persist`, but if `target`'s parent vanished after the caller
    /// created it (an empty directory pruned by a sibling delete), recreate
    /// it and rename once more.
    pub async fn persist_into(mut self, target: &Path) -> io::Result<()> {
        match fs::rename(&self.path, target).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let Some(parent) = target.parent() else {
                    return Err(err);
                };
                fs::create_dir_all(parent).await?;
                fs::rename(&self.path, target).await?;
            }
            Err(err) => return Err(err),
        }
        self.armed = false;
        Ok(())
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let result = if self.is_dir {
            std::fs::remove_dir_all(&self.path)
        } else {
            std::fs::remove_file(&self.path)
        };
        if let Err(err) = result {
            if err.kind() != ErrorKind::NotFound {
                tracing::debug!("failed to clean temp {}: {}", self.path.display(), err);
            }
        }
    }
}

/// Result of draining a body stream into a temp file.
#[derive(Debug)]
pub struct StagedFile {
    pub temp: TempPath,
    pub size: u64,
    pub etag: String,
}

/// Stream bytes into a fresh temp file, computing size and MD5 as they pass.
///
/// Fails with `ErrorKind::FileTooLarge` once `max_bytes` is exceeded.
pub async fn stage_stream<S>(tmp_dir: &Path, stream: S, max_bytes: Option<u64>) -> io::Result<StagedFile>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    let temp = TempPath::file_in(tmp_dir);
    let mut file = File::create(temp.path()).await?;

    let mut size: u64 = 0;
    let mut digest = Context::new();
    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        size += chunk.len() as u64;
        if max_bytes.is_some_and(|limit| size > limit) {
            return Err(io::Error::new(
                ErrorKind::FileTooLarge,
                "upload exceeds the configured size limit",
            ));
        }
        digest.consume(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;

    Ok(StagedFile {
        temp,
        size,
        etag: format!("{:x}", digest.compute()),
    })
}

/// Stage an in-memory buffer.
pub async fn stage_bytes(tmp_dir: &Path, content: Bytes) -> io::Result<StagedFile> {
    stage_stream(tmp_dir, futures::stream::once(async move { Ok(content) }), None).await
}

/// Recursively copy `source` into a temp directory inside `tmp_dir`.
pub async fn stage_dir_copy(tmp_dir: &Path, source: &Path) -> io::Result<TempPath> {
    let temp = TempPath::dir_in(tmp_dir);
    let mut pending = vec![(source.to_path_buf(), temp.path().to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        fs::create_dir(&to).await?;
        let mut entries = fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let dest = to.join(entry.file_name());
            if file_type.is_dir() {
                pending.push((entry.path(), dest));
            } else if file_type.is_file() {
                fs::copy(entry.path(), &dest).await?;
            }
        }
    }
    Ok(temp)
}

/// Stage a copy of a single file.
pub async fn stage_file_copy(tmp_dir: &Path, source: &Path) -> io::Result<TempPath> {
    let temp = TempPath::file_in(tmp_dir);
    fs::copy(source, temp.path()).await?;
    File::open(temp.path()).await?.sync_all().await?;
    Ok(temp)
}

/// Remove leftovers from a previous run.
pub async fn clear_tmp_dir(tmp_dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    let mut entries = match fs::read_dir(tmp_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_dir() {
            fs::remove_dir_all(&path).await?;
        } else {
            fs::remove_file(&path).await?;
        }
        removed += 1;
    }
    Ok(removed)
}
