//! File browser endpoints over the shared root.

use crate::{
    errors::AppError,
    handlers::content::{self, Content, Disposition},
    models::file_entry::FileEntry,
    services::{file_service::FileService, stats::ServerStats},
};
use axum::{
    Json,
    extract::{Multipart, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::{io, sync::Arc};

#[derive(Debug, Default, Deserialize)]
pub struct PathQuery {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub file: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MkdirRequest {
    pub dir_path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    pub old_path: String,
    pub new_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub source_path: String,
    pub target_path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrashRequest {
    pub source_path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteRequest {
    pub file_path: String,
    pub content: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryListing {
    pub path: String,
    pub is_dir: bool,
    pub files: Vec<FileEntry>,
}

#[derive(Serialize)]
pub struct SearchResults {
    pub results: Vec<FileEntry>,
    pub count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Uploaded {
    pub success: bool,
    pub files: Vec<FileEntry>,
}

async fn serve_file(
    files: &FileService,
    path: &str,
    disposition: Disposition,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    let (entry, file) = files.open_file(path).await?;
    let content_type = content::guess_mime(&entry.name);
    content::file_response(
        file,
        Content {
            size: entry.size_bytes,
            content_type: &content_type,
            etag: None,
            last_modified: entry.mod_time,
            file_name: Some(&entry.name),
            disposition,
        },
        headers,
    )
    .await
}

/// GET `/files?path=`: listing for a directory, inline content for a file.
pub async fn files(
    State(files): State<FileService>,
    Query(q): Query<PathQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let entry = files.stat(&q.path).await?;
    if !entry.is_dir {
        return serve_file(&files, &q.path, Disposition::Inline, &headers).await;
    }

    let listing = files.list_dir(&q.path).await?;
    Ok(Json(DirectoryListing {
        path: format!("/{}", entry.path),
        is_dir: true,
        files: listing,
    })
    .into_response())
}

/// GET `/download?file=`
pub async fn download(
    State(files): State<FileService>,
    State(stats): State<Arc<ServerStats>>,
    Query(q): Query<FileQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let response = serve_file(&files, &q.file, Disposition::Attachment, &headers).await?;
    stats.record_download();
    Ok(response)
}

/// GET `/preview?file=`
pub async fn preview(
    State(files): State<FileService>,
    Query(q): Query<FileQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    serve_file(&files, &q.file, Disposition::Inline, &headers).await
}

/// GET `/search?q=&path=`
pub async fn search(
    State(files): State<FileService>,
    Query(q): Query<SearchQuery>,
) -> Result<Json<SearchResults>, AppError> {
    let results = files.search(&q.q, &q.path).await?;
    Ok(Json(SearchResults {
        count: results.len(),
        results,
    }))
}

/// POST `/mkdir`
pub async fn mkdir(
    State(files): State<FileService>,
    Json(req): Json<MkdirRequest>,
) -> Result<impl IntoResponse, AppError> {
    let entry = files.mkdir(&req.dir_path).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// POST `/rename`
pub async fn rename(
    State(files): State<FileService>,
    Json(req): Json<RenameRequest>,
) -> Result<Json<FileEntry>, AppError> {
    Ok(Json(files.rename(&req.old_path, &req.new_name).await?))
}

/// POST `/move`
pub async fn move_entry(
    State(files): State<FileService>,
    Json(req): Json<TransferRequest>,
) -> Result<Json<FileEntry>, AppError> {
    Ok(Json(
        files.move_entry(&req.source_path, &req.target_path).await?,
    ))
}

/// POST `/copy`
pub async fn copy_entry(
    State(files): State<FileService>,
    Json(req): Json<TransferRequest>,
) -> Result<impl IntoResponse, AppError> {
    let entry = files.copy_entry(&req.source_path, &req.target_path).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// POST `/trash`
pub async fn trash(
    State(files): State<FileService>,
    Json(req): Json<TrashRequest>,
) -> Result<impl IntoResponse, AppError> {
    let entry = files.trash(&req.source_path).await?;
    Ok(Json(entry))
}

/// POST `/write`: replace a text file's content.
pub async fn write(
    State(files): State<FileService>,
    Json(req): Json<WriteRequest>,
) -> Result<Json<FileEntry>, AppError> {
    Ok(Json(files.write_file(&req.file_path, req.content).await?))
}

/// POST `/upload?path=`: every file field of the form lands in `path`.
pub async fn upload(
    State(files): State<FileService>,
    State(stats): State<Arc<ServerStats>>,
    Query(q): Query<PathQuery>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut uploaded = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::invalid(err.body_text()))?
    {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let stream = field.map_err(io::Error::other);
        let entry = files.upload(&q.path, &file_name, stream).await?;
        stats.record_upload();
        uploaded.push(entry);
    }

    if uploaded.is_empty() {
        return Err(AppError::invalid("no files in upload"));
    }
    tracing::info!("uploaded {} file(s) to /{}", uploaded.len(), q.path.trim_matches('/'));
    Ok((
        StatusCode::CREATED,
        Json(Uploaded {
            success: true,
            files: uploaded,
        }),
    ))
}
