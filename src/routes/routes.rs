//! Defines every HTTP route and the layers around them.
//!
//! ## Structure
//! - **Object API** (signed requests when API auth is on, a session when a password is set)
//!   - `GET    /api/v1/buckets`: list buckets
//!   - `GET    /api/v1/buckets/{bucket}`: list objects (prefix, delimiter, max-keys, continuation-token, start-after)
//!   - `PUT    /api/v1/buckets/{bucket}`: create bucket
//!   - `DELETE /api/v1/buckets/{bucket}`: delete bucket
//!   - `PUT    /api/v1/buckets/{bucket}/{*key}`: upload object
//!   - `POST   /api/v1/buckets/{bucket}/{*key}`: multipart upload
//!   - `GET    /api/v1/buckets/{bucket}/{*key}`: download object
//!   - `HEAD   /api/v1/buckets/{bucket}/{*key}`: metadata only
//!   - `DELETE /api/v1/buckets/{bucket}/{*key}`: move object to trash
//!
//! - **UI and management** (session when a password is set)
//!   - `/api/v1/keys`, `/api/shares*`, `/api/trash*`, the file browser and `/ws/stats`
//!
//! - **Public**
//!   - `/share/{token}`, `/auth/*`, `/health/*`, `/metrics`
//!
//! The wildcard `*key` allows nested keys like `photos/2025/img.jpg`.

use crate::{
    AppState,
    handlers::{
        auth_handlers, fs_handlers, health_handlers, key_handlers, object_handlers,
        share_handlers, stats_handlers, trash_handlers,
    },
    middleware::{admission::admission, api_auth::require_signature, session::require_session},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{delete, get, post, put},
};
use tower_http::{
    cors::{AllowHeaders, AllowOrigin, CorsLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::warn;

/// Served content is data, never a page: no scripts, and only same-origin
/// media for inline previews.
const CONTENT_SECURITY_POLICY: &str =
    "default-src 'none'; img-src 'self'; media-src 'self'; frame-ancestors 'self'";

/// Largest JSON body accepted by `/write`.
const WRITE_BODY_LIMIT: usize = 16 * 1024 * 1024;

fn object_api(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/api/v1/buckets", get(object_handlers::list_buckets))
        .route(
            "/api/v1/buckets/{bucket}",
            get(object_handlers::list_objects)
                .put(object_handlers::create_bucket)
                .delete(object_handlers::delete_bucket),
        )
        .route(
            "/api/v1/buckets/{bucket}/{*key}",
            put(object_handlers::put_object)
                .post(object_handlers::post_object)
                .get(object_handlers::get_object)
                .head(object_handlers::head_object)
                .delete(object_handlers::delete_object)
                .layer(DefaultBodyLimit::disable()),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_signature,
        ))
}

fn session_api(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/keys",
            get(key_handlers::list_keys)
                .post(key_handlers::create_key)
                .delete(key_handlers::delete_key)
                .patch(key_handlers::set_disabled),
        )
        .route("/api/shares", post(share_handlers::create_share))
        .route("/api/shares/list", get(share_handlers::list_shares))
        .route("/api/shares/delete", delete(share_handlers::delete_share))
        .route("/api/trash", get(trash_handlers::list_trash))
        .route("/api/trash/restore", post(trash_handlers::restore))
        .route("/api/trash/purge", delete(trash_handlers::purge))
        .route("/files", get(fs_handlers::files))
        .route("/download", get(fs_handlers::download))
        .route("/preview", get(fs_handlers::preview))
        .route("/search", get(fs_handlers::search))
        .route("/mkdir", post(fs_handlers::mkdir))
        .route("/rename", post(fs_handlers::rename))
        .route("/move", post(fs_handlers::move_entry))
        .route("/copy", post(fs_handlers::copy_entry))
        .route("/trash", post(fs_handlers::trash))
        .route(
            "/write",
            post(fs_handlers::write).layer(DefaultBodyLimit::max(WRITE_BODY_LIMIT)),
        )
        .route(
            "/upload",
            post(fs_handlers::upload).layer(DefaultBodyLimit::disable()),
        )
        .route("/ws/stats", get(stats_handlers::stats_socket))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ))
}

fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/share/{token}", get(share_handlers::resolve_share))
        .route("/auth/status", get(auth_handlers::status))
        .route("/auth/login", post(auth_handlers::login))
        .route("/auth/logout", post(auth_handlers::logout))
        .route("/health/live", get(health_handlers::live))
        .route("/health/ready", get(health_handlers::ready))
        .route("/health/startup", get(health_handlers::startup))
        .route("/metrics", get(stats_handlers::metrics))
}

/// CORS for the configured origins; `None` leaves cross-origin requests
/// to the browser's default policy.
fn build_cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins = origins
        .iter()
        .map(|origin| origin.trim())
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "invalid cors origin");
                None
            }
        })
        .collect::<Vec<_>>();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([
                Method::GET,
                Method::HEAD,
                Method::PUT,
                Method::POST,
                Method::PATCH,
                Method::DELETE,
            ])
            .allow_headers(AllowHeaders::mirror_request())
            .expose_headers([header::ETAG, header::CONTENT_RANGE, header::RETRY_AFTER])
            .allow_credentials(true),
    )
}

/// Build the router with all routes and global layers.
pub fn routes(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.allowed_origins);

    let mut app = Router::new()
        .merge(object_api(&state))
        .merge(session_api(&state))
        .merge(public_routes())
        .layer(middleware::from_fn_with_state(state.clone(), admission))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(CONTENT_SECURITY_POLICY),
        ))
        .layer(TraceLayer::new_for_http());

    if state.config.tls_enabled() {
        app = app.layer(SetResponseHeaderLayer::if_not_present(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        ));
    }

    if let Some(cors) = cors {
        app = app.layer(cors);
    }

    app.with_state(state)
}
