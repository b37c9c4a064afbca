//! Share link management (session gated) and the public `/share/{token}`
//! endpoint.

use crate::{
    AppState,
    errors::AppError,
    handlers::content::{self, Content, Disposition},
    models::{file_entry::FileEntry, share_link::ShareLinkView},
    services::{
        share_service::{NewShare, ResolvedShare, ShareService},
        stats::ServerStats,
    },
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShareRequest {
    pub path: String,
    pub password: Option<String>,
    /// Lifetime in seconds.
    pub expires_in: Option<f64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShareResponse {
    pub url: String,
    pub token: String,
    pub path: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub has_password: bool,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResolveQuery {
    pub password: Option<String>,
    pub path: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedDirectory {
    pub path: String,
    pub is_dir: bool,
    pub files: Vec<FileEntry>,
}

/// POST `/api/shares`
pub async fn create_share(
    State(state): State<AppState>,
    Json(req): Json<CreateShareRequest>,
) -> Result<impl IntoResponse, AppError> {
    let link = state
        .shares
        .create_link(NewShare {
            path: req.path,
            password: req.password,
            expires_in_secs: req.expires_in,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateShareResponse {
            url: state.config.share_url(&link.token),
            has_password: link.password_hash.is_some(),
            token: link.token,
            path: format!("/{}", link.path),
            expires_at: link.expires_at,
        }),
    ))
}

/// GET `/api/shares/list`
pub async fn list_shares(
    State(shares): State<ShareService>,
) -> Result<Json<Vec<ShareLinkView>>, AppError> {
    let links = shares.list_links().await?;
    Ok(Json(links.into_iter().map(ShareLinkView::from).collect()))
}

/// DELETE `/api/shares/delete?token=`
pub async fn delete_share(
    State(shares): State<ShareService>,
    Query(q): Query<TokenQuery>,
) -> Result<impl IntoResponse, AppError> {
    shares.delete_link(&q.token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/share/{token}?password=&path=`: public, no session needed.
pub async fn resolve_share(
    State(shares): State<ShareService>,
    State(stats): State<Arc<ServerStats>>,
    Path(token): Path<String>,
    Query(q): Query<ResolveQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let resolved = shares
        .resolve(&token, q.password.as_deref(), q.path.as_deref())
        .await?;

    match resolved {
        ResolvedShare::Directory { path, files, .. } => Ok(Json(SharedDirectory {
            path: format!("/{}", path),
            is_dir: true,
            files,
        })
        .into_response()),
        ResolvedShare::File { entry, file, .. } => {
            let content_type = content::guess_mime(&entry.name);
            let response = content::file_response(
                file,
                Content {
                    size: entry.size_bytes,
                    content_type: &content_type,
                    etag: None,
                    last_modified: entry.mod_time,
                    file_name: Some(&entry.name),
                    disposition: Disposition::Attachment,
                },
                &headers,
            )
            .await?;
            stats.record_download();
            Ok(response)
        }
    }
}
