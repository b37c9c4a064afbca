//! Trash listing, restore and purge.

use crate::{AppState, errors::AppError, models::trash::TrashEntry};
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct TrashId {
    pub id: Uuid,
}

#[derive(Serialize)]
pub struct TrashList {
    pub entries: Vec<TrashEntry>,
    pub count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Restored {
    pub id: Uuid,
    pub restored_path: String,
}

/// GET `/api/trash`
pub async fn list_trash(State(state): State<AppState>) -> Result<Json<TrashList>, AppError> {
    let entries = state.trash.list().await?;
    Ok(Json(TrashList {
        count: entries.len(),
        entries,
    }))
}

/// POST `/api/trash/restore`: objects go back through the object store so
/// their metadata row is recreated.
pub async fn restore(
    State(state): State<AppState>,
    Json(req): Json<TrashId>,
) -> Result<Json<Restored>, AppError> {
    let entry = state.trash.get(req.id).await?;
    if entry.bucket.is_some() {
        let object = state.storage.restore_object(&entry).await?;
        tracing::info!("restored object {} from trash", object.key);
    } else {
        state.files.restore(entry.id).await?;
        tracing::info!("restored /{} from trash", entry.original_path);
    }
    Ok(Json(Restored {
        id: entry.id,
        restored_path: format!("/{}", entry.original_path),
    }))
}

/// DELETE `/api/trash/purge?id=`
pub async fn purge(
    State(state): State<AppState>,
    Query(q): Query<TrashId>,
) -> Result<impl IntoResponse, AppError> {
    let entry = state.trash.purge(q.id).await?;
    tracing::info!("purged /{} from trash", entry.original_path);
    Ok(StatusCode::NO_CONTENT)
}
