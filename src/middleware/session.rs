//! Password session gate for the browser UI and management routes.

use crate::{
    AppState, errors::AppError, services::session_service::SESSION_COOKIE,
    services::signature::AuthError,
};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;

/// Session token from the cookie, a bearer header or `X-Session-Token`.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(cookie) = CookieJar::from_headers(headers).get(SESSION_COOKIE) {
        return Some(cookie.value().to_string());
    }
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string());
    bearer.or_else(|| {
        headers
            .get("x-session-token")
            .and_then(|value| value.to_str().ok())
            .map(|token| token.trim().to_string())
    })
}

pub async fn require_session(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = session_token(req.headers());
    if state.sessions.validate(token.as_deref()) {
        Ok(next.run(req).await)
    } else {
        Err(AuthError::SessionRequired.into())
    }
}
