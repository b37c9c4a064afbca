#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{Request, Response},
};
use beamdrop::{AppState, build_app, config::AppConfig};
use bytes::Bytes;
use http_body_util::BodyExt;
use std::net::SocketAddr;
use tempfile::TempDir;
use tower::ServiceExt;

pub struct TestApp {
    pub dir: TempDir,
    pub state: AppState,
    pub app: Router,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(configure: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::for_dir(dir.path());
        configure(&mut config);
        let state = AppState::initialize(config).await.unwrap();
        let app = build_app(state.clone());
        Self { dir, state, app }
    }

    /// Send a request as if it came from 127.0.0.1.
    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        self.send_from(req, [127, 0, 0, 1]).await
    }

    pub async fn send_from(&self, mut req: Request<Body>, ip: [u8; 4]) -> Response<Body> {
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((ip, 40_000))));
        self.app.clone().oneshot(req).await.unwrap()
    }

    pub fn root(&self) -> std::path::PathBuf {
        self.state.config.dir.clone()
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn raw_request(method: &str, uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(body.into())
        .unwrap()
}

pub async fn body_bytes(resp: Response<Body>) -> Bytes {
    resp.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(resp: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}

/// A single-file `multipart/form-data` body.
pub fn multipart_body(field: &str, file_name: &str, content: &[u8]) -> (String, Vec<u8>) {
    let boundary = "beamdrop-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}
