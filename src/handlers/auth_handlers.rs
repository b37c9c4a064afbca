//! Password login for the browser UI.

use crate::{
    errors::AppError,
    middleware::session::session_token,
    services::session_service::{SESSION_COOKIE, SessionStore},
};
use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use axum_extra::extract::{
    CookieJar,
    cookie::{Cookie, SameSite},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub auth_enabled: bool,
    pub authenticated: bool,
}

/// GET `/auth/status`
pub async fn status(State(sessions): State<SessionStore>, headers: HeaderMap) -> Json<AuthStatus> {
    let token = session_token(&headers);
    Json(AuthStatus {
        auth_enabled: sessions.enabled(),
        authenticated: sessions.validate(token.as_deref()),
    })
}

/// POST `/auth/login`
pub async fn login(
    State(sessions): State<SessionStore>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), AppError> {
    let token = sessions.login(&req.password)?;
    let cookie = Cookie::build((SESSION_COOKIE, token.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .build();

    Ok((
        jar.add(cookie),
        Json(LoginResponse {
            success: true,
            token,
        }),
    ))
}

/// POST `/auth/logout`
pub async fn logout(
    State(sessions): State<SessionStore>,
    jar: CookieJar,
    headers: HeaderMap,
) -> (CookieJar, StatusCode) {
    if let Some(token) = session_token(&headers) {
        sessions.logout(&token);
    }
    (
        jar.remove(Cookie::build(SESSION_COOKIE).path("/").build()),
        StatusCode::NO_CONTENT,
    )
}
