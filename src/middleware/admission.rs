//! Per-IP rate limiting in front of every route.

use crate::{
    AppState,
    errors::AppError,
    services::rate_limiter::{Admission, classify},
};
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tracing::warn;

/// Source address of a request. `X-Forwarded-For` is only honoured when
/// the server is told it sits behind a proxy.
pub fn client_ip(req: &Request, trust_proxy: bool) -> IpAddr {
    if trust_proxy {
        let forwarded = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|value| value.trim().parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            return ip;
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

pub async fn admission(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(tier) = classify(req.method(), req.uri().path(), req.uri().query()) else {
        return next.run(req).await;
    };
    let ip = client_ip(&req, state.config.trust_proxy);

    match state.limiter.check(tier, ip) {
        Admission::Allowed { .. } => {
            state.stats.record_request();
            next.run(req).await
        }
        Admission::Limited { retry_after } => {
            state.stats.record_rate_limited();
            warn!(%ip, tier = tier.as_str(), "rate limited {}", req.uri().path());
            AppError::rate_limited(retry_after).into_response()
        }
    }
}
