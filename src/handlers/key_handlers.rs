//! API key management, behind the UI session gate.

use crate::{
    errors::AppError,
    models::api_key::{ApiKeyView, KeyPermissions},
    services::key_service::{KeyService, NewApiKey},
};
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKeyRequest {
    pub name: String,
    pub bucket_scope: Option<String>,
    /// Seconds until the key expires.
    pub expires_in: Option<i64>,
    pub permissions: Option<KeyPermissions>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyQuery {
    pub access_key_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetDisabledRequest {
    pub access_key_id: String,
    pub disabled: bool,
}

#[derive(Serialize)]
pub struct KeyList {
    pub keys: Vec<ApiKeyView>,
}

/// GET `/api/v1/keys`
pub async fn list_keys(State(keys): State<KeyService>) -> Result<Json<KeyList>, AppError> {
    let keys = keys
        .list_keys()
        .await?
        .into_iter()
        .map(ApiKeyView::from)
        .collect();
    Ok(Json(KeyList { keys }))
}

/// POST `/api/v1/keys`: the response is the only time the secret is shown.
pub async fn create_key(
    State(keys): State<KeyService>,
    Json(req): Json<CreateKeyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let created = keys
        .create_key(NewApiKey {
            name: req.name,
            bucket_scope: req.bucket_scope.filter(|scope| !scope.is_empty()),
            expires_in_secs: req.expires_in,
            permissions: req.permissions.unwrap_or_default(),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// DELETE `/api/v1/keys?accessKeyId=`
pub async fn delete_key(
    State(keys): State<KeyService>,
    Query(q): Query<KeyQuery>,
) -> Result<impl IntoResponse, AppError> {
    keys.delete_key(&q.access_key_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH `/api/v1/keys`: disable or re-enable a key.
pub async fn set_disabled(
    State(keys): State<KeyService>,
    Json(req): Json<SetDisabledRequest>,
) -> Result<Json<ApiKeyView>, AppError> {
    let key = keys.set_disabled(&req.access_key_id, req.disabled).await?;
    Ok(Json(key.into()))
}
