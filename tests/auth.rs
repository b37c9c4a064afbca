mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use beamdrop::{
    models::api_key::KeyPermissions,
    services::{
        key_service::NewApiKey,
        signature::{AuthError, DATE_HEADER, SignedRequest, compute_signature},
    },
};
use chrono::{Duration, SecondsFormat, Utc};
use common::{TestApp, body_json, get, json_request};
use serde_json::json;

fn signed(
    method: &str,
    path: &str,
    access_key_id: &str,
    secret: &str,
    body: Body,
) -> Request<Body> {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let signature = compute_signature(secret, method, path, &timestamp);
    Request::builder()
        .method(method)
        .uri(path)
        .header("authorization", format!("Bearer {}:{}", access_key_id, signature))
        .header(DATE_HEADER, timestamp)
        .body(body)
        .unwrap()
}

async fn api_auth_app() -> TestApp {
    TestApp::with_config(|config| config.api_auth = true).await
}

#[tokio::test]
async fn key_lifecycle_over_http() {
    let app = TestApp::new().await;

    let resp = app
        .send(json_request(
            "POST",
            "/api/v1/keys",
            json!({ "name": "ci", "bucketScope": "builds", "expiresIn": 3600 }),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = body_json(resp).await;
    let access_key_id = created["accessKeyId"].as_str().unwrap().to_string();
    assert!(access_key_id.starts_with("BDK_"));
    assert!(!created["secretKey"].as_str().unwrap().is_empty());
    assert_eq!(created["permissions"], "read-write");

    let listed = body_json(app.send(get("/api/v1/keys")).await).await;
    let keys = listed["keys"].as_array().unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["bucketScope"], "builds");
    assert!(keys[0].get("secretKey").is_none());
    assert!(keys[0].get("secretHash").is_none());

    let resp = app
        .send(json_request(
            "PATCH",
            "/api/v1/keys",
            json!({ "accessKeyId": access_key_id, "disabled": true }),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["disabled"], true);

    let uri = format!("/api/v1/keys?accessKeyId={}", access_key_id);
    let resp = app
        .send(Request::builder().method("DELETE").uri(&uri).body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let resp = app
        .send(Request::builder().method("DELETE").uri(&uri).body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn signed_requests_are_required_in_api_auth_mode() {
    let app = api_auth_app().await;
    let key = app
        .state
        .keys
        .create_key(NewApiKey {
            name: "uploader".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let resp = app.send(get("/api/v1/buckets")).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .send(signed(
            "PUT",
            "/api/v1/buckets/signed",
            &key.access_key_id,
            &key.secret_key,
            Body::empty(),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = app
        .send(signed(
            "PUT",
            "/api/v1/buckets/signed/a.txt",
            &key.access_key_id,
            &key.secret_key,
            Body::from("payload"),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    // Signature over a different path does not verify.
    let mut forged = signed(
        "GET",
        "/api/v1/buckets/signed",
        &key.access_key_id,
        &key.secret_key,
        Body::empty(),
    );
    *forged.uri_mut() = "/api/v1/buckets/signed/a.txt".parse().unwrap();
    let resp = app.send(forged).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let stored = app.state.keys.find(&key.access_key_id).await.unwrap().unwrap();
    assert!(stored.last_used_at.is_some());
}

#[tokio::test]
async fn scoped_and_read_only_keys_are_forbidden_elsewhere() {
    let app = api_auth_app().await;
    app.state.storage.create_bucket("photos").await.unwrap();
    app.state.storage.create_bucket("docs").await.unwrap();

    let reader = app
        .state
        .keys
        .create_key(NewApiKey {
            name: "viewer".into(),
            bucket_scope: Some("photos".into()),
            permissions: KeyPermissions::ReadOnly,
            ..Default::default()
        })
        .await
        .unwrap();

    let resp = app
        .send(signed(
            "GET",
            "/api/v1/buckets/photos",
            &reader.access_key_id,
            &reader.secret_key,
            Body::empty(),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .send(signed(
            "GET",
            "/api/v1/buckets/docs",
            &reader.access_key_id,
            &reader.secret_key,
            Body::empty(),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = app
        .send(signed(
            "PUT",
            "/api/v1/buckets/photos/new.jpg",
            &reader.access_key_id,
            &reader.secret_key,
            Body::from("jpeg"),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let listed = body_json(
        app.send(signed(
            "GET",
            "/api/v1/buckets",
            &reader.access_key_id,
            &reader.secret_key,
            Body::empty(),
        ))
        .await,
    )
    .await;
    assert_eq!(listed["buckets"].as_array().unwrap().len(), 1);
    assert_eq!(listed["buckets"][0]["name"], "photos");
}

#[tokio::test]
async fn expired_key_fails_even_with_valid_signature() {
    let app = api_auth_app().await;
    let created_at = Utc::now();
    let key = app
        .state
        .keys
        .create_key_at(
            NewApiKey {
                name: "short-lived".into(),
                expires_in_secs: Some(1),
                ..Default::default()
            },
            created_at,
        )
        .await
        .unwrap();

    let later = created_at + Duration::seconds(2);
    let timestamp = later.to_rfc3339_opts(SecondsFormat::Secs, true);
    let signature = compute_signature(&key.secret_key, "GET", "/api/v1/buckets", &timestamp);
    let request = SignedRequest {
        access_key_id: &key.access_key_id,
        signature: &signature,
        method: "GET",
        path: "/api/v1/buckets",
        timestamp: &timestamp,
    };

    assert!(
        app.state
            .verifier
            .authenticate_at(&request, created_at)
            .await
            .is_ok()
    );
    assert_eq!(
        app.state.verifier.authenticate_at(&request, later).await,
        Err(AuthError::KeyExpired)
    );
}

#[tokio::test]
async fn disabled_and_stale_requests_are_rejected() {
    let app = api_auth_app().await;
    let key = app
        .state
        .keys
        .create_key(NewApiKey {
            name: "ops".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let now = Utc::now();
    let old = (now - Duration::minutes(20)).to_rfc3339_opts(SecondsFormat::Secs, true);
    let signature = compute_signature(&key.secret_key, "GET", "/api/v1/buckets", &old);
    let stale = SignedRequest {
        access_key_id: &key.access_key_id,
        signature: &signature,
        method: "GET",
        path: "/api/v1/buckets",
        timestamp: &old,
    };
    assert_eq!(
        app.state.verifier.authenticate_at(&stale, now).await,
        Err(AuthError::StaleRequest)
    );

    app.state.keys.set_disabled(&key.access_key_id, true).await.unwrap();
    let resp = app
        .send(signed(
            "GET",
            "/api/v1/buckets",
            &key.access_key_id,
            &key.secret_key,
            Body::empty(),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.state.stats.snapshot(Default::default()).auth_failures, 1);
}

#[tokio::test]
async fn password_session_gates_the_ui() {
    let app = TestApp::with_config(|config| config.password = Some("hunter2".into())).await;

    let status = body_json(app.send(get("/auth/status")).await).await;
    assert_eq!(status["authEnabled"], true);
    assert_eq!(status["authenticated"], false);

    let resp = app.send(get("/files?path=/")).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .send(json_request("POST", "/auth/login", json!({ "password": "nope" })))
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .send(json_request("POST", "/auth/login", json!({ "password": "hunter2" })))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let cookie = resp.headers()["set-cookie"].to_str().unwrap().to_string();
    assert!(cookie.starts_with("beamdrop_session="));
    assert!(cookie.contains("HttpOnly"));
    let token = body_json(resp).await["token"].as_str().unwrap().to_string();

    let with_cookie = Request::builder()
        .uri("/files?path=/")
        .header("cookie", format!("beamdrop_session={}", token))
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.send(with_cookie).await.status(), StatusCode::OK);

    let with_bearer = Request::builder()
        .uri("/api/trash")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.send(with_bearer).await.status(), StatusCode::OK);

    let logout = Request::builder()
        .method("POST")
        .uri("/auth/logout")
        .header("x-session-token", token.as_str())
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.send(logout).await.status(), StatusCode::NO_CONTENT);

    let after = Request::builder()
        .uri("/files?path=/")
        .header("x-session-token", token.as_str())
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.send(after).await.status(), StatusCode::UNAUTHORIZED);

    // Probes stay public.
    assert_eq!(app.send(get("/health/live")).await.status(), StatusCode::OK);
}

fn with_session(method: &str, uri: &str, token: &str, body: Body) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("cookie", format!("beamdrop_session={}", token))
        .body(body)
        .unwrap()
}

#[tokio::test]
async fn password_protects_object_api_without_api_auth() {
    let app = TestApp::with_config(|config| config.password = Some("hunter2".into())).await;

    let resp = app.send(get("/api/v1/buckets")).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await["error"]["code"], "Unauthorized");
    let resp = app
        .send(common::raw_request("PUT", "/api/v1/buckets/secret-bucket", Body::empty()))
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(app.state.storage.list_buckets().await.unwrap().is_empty());

    let token = app.state.sessions.login("hunter2").unwrap();
    let resp = app
        .send(with_session("PUT", "/api/v1/buckets/secret-bucket", &token, Body::empty()))
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let resp = app
        .send(with_session(
            "PUT",
            "/api/v1/buckets/secret-bucket/note.txt",
            &token,
            Body::from("classified"),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app.send(get("/api/v1/buckets/secret-bucket/note.txt")).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let resp = app
        .send(with_session("GET", "/api/v1/buckets", &token, Body::empty()))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["buckets"][0]["name"], "secret-bucket");

    app.state.sessions.logout(&token);
    let resp = app
        .send(with_session("GET", "/api/v1/buckets", &token, Body::empty()))
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn object_api_takes_session_or_signature_when_both_are_configured() {
    let app = TestApp::with_config(|config| {
        config.password = Some("hunter2".into());
        config.api_auth = true;
    })
    .await;
    let key = app
        .state
        .keys
        .create_key(NewApiKey {
            name: "ci".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let resp = app.send(get("/api/v1/buckets")).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let token = app.state.sessions.login("hunter2").unwrap();
    let resp = app
        .send(with_session("PUT", "/api/v1/buckets/mixed", &token, Body::empty()))
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = app
        .send(signed(
            "GET",
            "/api/v1/buckets/mixed",
            &key.access_key_id,
            &key.secret_key,
            Body::empty(),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    // A stale session is not a fallback for a bad signature.
    app.state.sessions.logout(&token);
    let resp = app
        .send(with_session("GET", "/api/v1/buckets", &token, Body::empty()))
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}
