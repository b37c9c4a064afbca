//! Authentication for `/api/v1/buckets*`.
//!
//! A valid UI session is accepted whenever a password is configured. Past
//! that, API-auth mode requires a signed request and password-only mode
//! rejects the call. Only with neither mode active is the API open.
//!
//! On success the request carries an `AccessScope` extension that handlers
//! check against the bucket and operation they serve.

use crate::{
    AppState,
    errors::AppError,
    middleware::session::session_token,
    services::signature::{
        AccessScope, AuthError, DATE_HEADER, KeyGrant, SignedRequest, parse_authorization,
    },
};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use tracing::warn;

/// Owned copy of what the signature covers, so nothing borrowed from the
/// request is held across the key lookup.
struct Credentials {
    access_key_id: String,
    signature: String,
    method: String,
    path: String,
    timestamp: String,
}

impl Credentials {
    fn from_request(req: &Request) -> Result<Self, AuthError> {
        let headers: &HeaderMap = req.headers();
        let authorization = headers
            .get(header::AUTHORIZATION)
            .ok_or(AuthError::MissingCredentials)?
            .to_str()
            .map_err(|_| AuthError::MalformedHeader)?;
        let (access_key_id, signature) = parse_authorization(authorization)?;
        let timestamp = headers
            .get(DATE_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(AuthError::InvalidTimestamp)?;

        Ok(Self {
            access_key_id: access_key_id.to_string(),
            signature: signature.to_string(),
            method: req.method().as_str().to_string(),
            path: req.uri().path().to_string(),
            timestamp: timestamp.to_string(),
        })
    }

    fn signed(&self) -> SignedRequest<'_> {
        SignedRequest {
            access_key_id: &self.access_key_id,
            signature: &self.signature,
            method: &self.method,
            path: &self.path,
            timestamp: &self.timestamp,
        }
    }
}

async fn verify(state: &AppState, credentials: Result<Credentials, AuthError>) -> Result<KeyGrant, AuthError> {
    let credentials = credentials?;
    state.verifier.authenticate(&credentials.signed()).await
}

pub async fn require_signature(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let session = session_token(req.headers());
    if state.sessions.enabled() && state.sessions.validate(session.as_deref()) {
        req.extensions_mut().insert(AccessScope::Unrestricted);
        return Ok(next.run(req).await);
    }

    if !state.config.api_auth {
        if state.sessions.enabled() {
            state.stats.record_auth_failure();
            warn!("no session for {} {}", req.method(), req.uri().path());
            return Err(AuthError::SessionRequired.into());
        }
        req.extensions_mut().insert(AccessScope::Unrestricted);
        return Ok(next.run(req).await);
    }

    let credentials = Credentials::from_request(&req);
    match verify(&state, credentials).await {
        Ok(grant) => {
            req.extensions_mut().insert(AccessScope::Key(grant));
            Ok(next.run(req).await)
        }
        Err(err) => {
            state.stats.record_auth_failure();
            warn!(
                reason = err.reason(),
                "rejected {} {}",
                req.method(),
                req.uri().path()
            );
            Err(err.into())
        }
    }
}
