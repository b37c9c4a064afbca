//! HTTP handlers for object and bucket operations.
//! Streams object bodies to avoid buffering in memory and delegates storage
//! concerns to `StorageService`.

use crate::{
    errors::AppError,
    handlers::content::{self, Content, Disposition},
    models::{bucket::Bucket, object::Object},
    services::{
        signature::AccessScope,
        stats::ServerStats,
        storage_service::{ListObjectsParams, MAX_LIST_KEYS, StorageService},
    },
};
use axum::{
    Extension, Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::{io, sync::Arc};

/// Query params accepted by ListObjects.
#[derive(Debug, Deserialize)]
pub struct ListObjectsQuery {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<usize>,
    #[serde(rename = "continuation-token")]
    pub continuation_token: Option<String>,
    #[serde(rename = "start-after")]
    pub start_after: Option<String>,
}

#[derive(Serialize)]
pub struct BucketList {
    pub buckets: Vec<Bucket>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListObjectsResponse {
    pub name: String,
    pub prefix: String,
    pub delimiter: Option<String>,
    pub max_keys: usize,
    pub key_count: usize,
    pub is_truncated: bool,
    pub continuation_token: Option<String>,
    pub next_continuation_token: Option<String>,
    pub contents: Vec<Object>,
    pub common_prefixes: Vec<String>,
}

fn content_type_for(headers: &HeaderMap, key: &str) -> String {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .unwrap_or_else(|| content::guess_mime(key))
}

fn stored_response(status: StatusCode, object: Object) -> Response {
    let etag = HeaderValue::from_str(&format!("\"{}\"", object.etag)).ok();
    let mut response = (status, Json(object)).into_response();
    if let Some(value) = etag {
        response.headers_mut().insert(header::ETAG, value);
    }
    response
}

/// GET `/api/v1/buckets`: buckets visible to the caller.
pub async fn list_buckets(
    State(service): State<StorageService>,
    Extension(scope): Extension<AccessScope>,
) -> Result<Json<BucketList>, AppError> {
    let buckets = service
        .list_buckets()
        .await?
        .into_iter()
        .filter(|bucket| scope.allows_bucket(&bucket.name))
        .collect();
    Ok(Json(BucketList { buckets }))
}

/// PUT `/api/v1/buckets/{bucket}`: create bucket.
pub async fn create_bucket(
    State(service): State<StorageService>,
    Extension(scope): Extension<AccessScope>,
    Path(bucket): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    scope.check_admin(&bucket)?;
    let created = service.create_bucket(&bucket).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// DELETE `/api/v1/buckets/{bucket}`: delete an empty bucket.
pub async fn delete_bucket(
    State(service): State<StorageService>,
    Extension(scope): Extension<AccessScope>,
    Path(bucket): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    scope.check_admin(&bucket)?;
    service.delete_bucket(&bucket).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/api/v1/buckets/{bucket}`: list objects, supports
/// ?prefix=&delimiter=&max-keys=&continuation-token=&start-after=
pub async fn list_objects(
    State(service): State<StorageService>,
    Extension(scope): Extension<AccessScope>,
    Path(bucket): Path<String>,
    Query(q): Query<ListObjectsQuery>,
) -> Result<Json<ListObjectsResponse>, AppError> {
    scope.check_bucket(&bucket)?;

    let params = ListObjectsParams {
        prefix: q.prefix.clone(),
        delimiter: q.delimiter.clone(),
        continuation_token: q.continuation_token.clone(),
        start_after: q.start_after,
        max_keys: q.max_keys.unwrap_or(MAX_LIST_KEYS),
    };
    let result = service.list_objects(&bucket, params).await?;

    Ok(Json(ListObjectsResponse {
        name: bucket,
        prefix: q.prefix.unwrap_or_default(),
        delimiter: q.delimiter,
        max_keys: result.max_keys,
        key_count: result.key_count,
        is_truncated: result.is_truncated,
        continuation_token: q.continuation_token,
        next_continuation_token: result.next_continuation_token,
        contents: result.objects,
        common_prefixes: result.common_prefixes,
    }))
}

/// PUT `/api/v1/buckets/{bucket}/{*key}`: upload object from the raw body.
pub async fn put_object(
    State(service): State<StorageService>,
    State(stats): State<Arc<ServerStats>>,
    Extension(scope): Extension<AccessScope>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    scope.check_write(&bucket)?;
    let content_type = content_type_for(&headers, &key);

    let stream = body.into_data_stream().map(|chunk| chunk.map_err(io::Error::other));
    let object = service
        .put_object_stream(&bucket, &key, Some(content_type), stream)
        .await?;

    stats.record_upload();
    Ok(stored_response(StatusCode::OK, object))
}

/// POST `/api/v1/buckets/{bucket}/{*key}`: upload object from the first
/// file field of a multipart form.
pub async fn post_object(
    State(service): State<StorageService>,
    State(stats): State<Arc<ServerStats>>,
    Extension(scope): Extension<AccessScope>,
    Path((bucket, key)): Path<(String, String)>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    scope.check_write(&bucket)?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::invalid(err.body_text()))?
    {
        if field.file_name().is_none() && field.name() != Some("file") {
            continue;
        }
        let content_type = field
            .content_type()
            .filter(|ct| !ct.is_empty() && *ct != "application/octet-stream")
            .map(str::to_string)
            .unwrap_or_else(|| content::guess_mime(&key));

        let stream = field.map_err(io::Error::other);
        let object = service
            .put_object_stream(&bucket, &key, Some(content_type), stream)
            .await?;

        stats.record_upload();
        return Ok(stored_response(StatusCode::CREATED, object));
    }

    Err(AppError::invalid("multipart body has no file field"))
}

/// GET `/api/v1/buckets/{bucket}/{*key}`: stream an object, `Range` aware.
pub async fn get_object(
    State(service): State<StorageService>,
    State(stats): State<Arc<ServerStats>>,
    Extension(scope): Extension<AccessScope>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    scope.check_bucket(&bucket)?;
    let (meta, file) = service.get_object(&bucket, &key).await?;

    let response = content::file_response(file, object_content(&meta), &headers).await?;
    stats.record_download();
    Ok(response)
}

/// HEAD `/api/v1/buckets/{bucket}/{*key}`: same headers as GET but no body.
pub async fn head_object(
    State(service): State<StorageService>,
    Extension(scope): Extension<AccessScope>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    scope.check_bucket(&bucket)?;
    let meta = service.head_object(&bucket, &key).await?;

    let mut response = Response::new(Body::empty());
    let size = meta.size_bytes.max(0) as u64;
    content::set_content_headers(response.headers_mut(), &object_content(&meta), size);
    Ok(response)
}

/// DELETE `/api/v1/buckets/{bucket}/{*key}`: move the object to the trash.
pub async fn delete_object(
    State(service): State<StorageService>,
    Extension(scope): Extension<AccessScope>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    scope.check_write(&bucket)?;
    let entry = service.delete_object(&bucket, &key).await?;
    tracing::debug!("object {}/{} trashed as {}", bucket, key, entry.id);
    Ok(StatusCode::NO_CONTENT)
}

fn object_content(meta: &Object) -> Content<'_> {
    Content {
        size: meta.size_bytes.max(0) as u64,
        content_type: meta.content_type_or_default(),
        etag: Some(&meta.etag),
        last_modified: meta.last_modified,
        file_name: meta.key.rsplit('/').next(),
        disposition: Disposition::Inline,
    }
}
