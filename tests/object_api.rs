mod common;

use axum::{body::Body, http::Request, http::StatusCode};
use beamdrop::services::storage_service::{ListObjectsParams, StorageError};
use common::{TestApp, body_bytes, body_json, get, json_request, multipart_body, raw_request};
use std::io;

async fn put(app: &TestApp, uri: &str, content: &'static [u8]) -> serde_json::Value {
    let resp = app.send(raw_request("PUT", uri, content)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    body_json(resp).await
}

#[tokio::test]
async fn create_list_and_delete_buckets() {
    let app = TestApp::new().await;

    let resp = app.send(raw_request("PUT", "/api/v1/buckets/photos", Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let resp = app.send(raw_request("PUT", "/api/v1/buckets/photos", Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let listed = body_json(app.send(get("/api/v1/buckets")).await).await;
    let names: Vec<&str> = listed["buckets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["photos"]);

    put(&app, "/api/v1/buckets/photos/a.jpg", b"jpeg").await;
    let resp = app.send(raw_request("DELETE", "/api/v1/buckets/photos", Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(resp).await["error"]["code"], "NotEmpty");

    let resp = app
        .send(raw_request("DELETE", "/api/v1/buckets/photos/a.jpg", Body::empty()))
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let resp = app.send(raw_request("DELETE", "/api/v1/buckets/photos", Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(!app.root().join("buckets/photos").exists());
}

#[tokio::test]
async fn invalid_bucket_name_is_rejected() {
    let app = TestApp::new().await;
    let resp = app.send(raw_request("PUT", "/api/v1/buckets/Bad_Name", Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["status"], 400);
    assert_eq!(body["error"]["code"], "InvalidInput");
}

#[tokio::test]
async fn put_then_get_round_trips_and_etag_tracks_content() {
    let app = TestApp::new().await;
    app.state.storage.create_bucket("docs").await.unwrap();

    let first = put(&app, "/api/v1/buckets/docs/notes/today.txt", b"hello world").await;
    assert_eq!(first["size"], 11);
    assert_eq!(first["etag"], format!("{:x}", md5::compute(b"hello world")));

    let resp = app.send(get("/api/v1/buckets/docs/notes/today.txt")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "text/plain");
    let etag = resp.headers()["etag"].to_str().unwrap().to_string();
    assert_eq!(body_bytes(resp).await.as_ref(), b"hello world");

    let again = app.send(get("/api/v1/buckets/docs/notes/today.txt")).await;
    assert_eq!(again.headers()["etag"].to_str().unwrap(), etag);

    let second = put(&app, "/api/v1/buckets/docs/notes/today.txt", b"goodbye").await;
    assert_ne!(second["etag"], first["etag"]);
    let resp = app.send(get("/api/v1/buckets/docs/notes/today.txt")).await;
    assert_ne!(resp.headers()["etag"].to_str().unwrap(), etag);
    assert_eq!(body_bytes(resp).await.as_ref(), b"goodbye");
}

#[tokio::test]
async fn head_and_range_requests() {
    let app = TestApp::new().await;
    app.state.storage.create_bucket("media").await.unwrap();
    put(&app, "/api/v1/buckets/media/clip.bin", b"0123456789").await;

    let resp = app
        .send(raw_request("HEAD", "/api/v1/buckets/media/clip.bin", Body::empty()))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-length"], "10");
    assert_eq!(resp.headers()["accept-ranges"], "bytes");

    let req = Request::builder()
        .uri("/api/v1/buckets/media/clip.bin")
        .header("range", "bytes=2-5")
        .body(Body::empty())
        .unwrap();
    let resp = app.send(req).await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(resp.headers()["content-range"], "bytes 2-5/10");
    assert_eq!(body_bytes(resp).await.as_ref(), b"2345");

    let req = Request::builder()
        .uri("/api/v1/buckets/media/clip.bin")
        .header("range", "bytes=20-30")
        .body(Body::empty())
        .unwrap();
    let resp = app.send(req).await;
    assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn missing_objects_are_not_found() {
    let app = TestApp::new().await;
    app.state.storage.create_bucket("docs").await.unwrap();
    let resp = app.send(get("/api/v1/buckets/docs/nope.txt")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = app.send(get("/api/v1/buckets/ghost/nope.txt")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn prefix_and_delimiter_listing() {
    let app = TestApp::new().await;
    app.state.storage.create_bucket("site").await.unwrap();
    for key in ["images/a.jpg", "images/thumb/b.jpg", "docs/c.txt"] {
        let resp = app
            .send(raw_request("PUT", &format!("/api/v1/buckets/site/{}", key), "x"))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let listed = body_json(
        app.send(get("/api/v1/buckets/site?prefix=images/&delimiter=/"))
            .await,
    )
    .await;
    let keys: Vec<&str> = listed["contents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["key"].as_str().unwrap())
        .collect();
    assert_eq!(keys, vec!["images/a.jpg"]);
    assert_eq!(listed["commonPrefixes"], serde_json::json!(["images/thumb/"]));
    assert_eq!(listed["isTruncated"], false);

    let top = body_json(app.send(get("/api/v1/buckets/site?delimiter=/")).await).await;
    assert_eq!(top["contents"], serde_json::json!([]));
    assert_eq!(top["commonPrefixes"], serde_json::json!(["docs/", "images/"]));
}

#[tokio::test]
async fn pagination_resumes_after_last_entry() {
    let app = TestApp::new().await;
    let storage = &app.state.storage;
    storage.create_bucket("paged").await.unwrap();
    for key in ["a.txt", "b/1.txt", "b/2.txt", "c.txt", "d.txt"] {
        storage
            .put_object_bytes("paged", key, None, bytes::Bytes::from_static(b"x"))
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    let mut token = None;
    loop {
        let page = storage
            .list_objects(
                "paged",
                ListObjectsParams {
                    delimiter: Some("/".into()),
                    continuation_token: token.take(),
                    max_keys: 2,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(page.key_count <= 2);
        seen.extend(page.objects.into_iter().map(|o| o.key));
        seen.extend(page.common_prefixes);
        if !page.is_truncated {
            break;
        }
        token = page.next_continuation_token;
        assert!(token.is_some());
    }
    seen.sort();
    assert_eq!(seen, vec!["a.txt", "b/", "c.txt", "d.txt"]);

    let after = storage
        .list_objects(
            "paged",
            ListObjectsParams {
                start_after: Some("b/2.txt".into()),
                max_keys: 10,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let keys: Vec<_> = after.objects.iter().map(|o| o.key.as_str()).collect();
    assert_eq!(keys, vec!["c.txt", "d.txt"]);
}

#[tokio::test]
async fn multipart_post_stores_first_file_field() {
    let app = TestApp::new().await;
    app.state.storage.create_bucket("forms").await.unwrap();

    let (content_type, body) = multipart_body("file", "report.csv", b"a,b\n1,2\n");
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/buckets/forms/reports/q1.csv")
        .header("content-type", content_type)
        .body(Body::from(body))
        .unwrap();
    let resp = app.send(req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let object = body_json(resp).await;
    assert_eq!(object["key"], "reports/q1.csv");
    assert_eq!(object["contentType"], "text/csv");

    let resp = app.send(get("/api/v1/buckets/forms/reports/q1.csv")).await;
    assert_eq!(body_bytes(resp).await.as_ref(), b"a,b\n1,2\n");
}

#[tokio::test]
async fn deleted_object_goes_to_trash_and_restores() {
    let app = TestApp::new().await;
    app.state.storage.create_bucket("keep").await.unwrap();
    let stored = put(&app, "/api/v1/buckets/keep/letters/hello.txt", b"dear reader").await;

    let resp = app
        .send(raw_request("DELETE", "/api/v1/buckets/keep/letters/hello.txt", Body::empty()))
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let listed = body_json(app.send(get("/api/v1/buckets/keep")).await).await;
    assert_eq!(listed["keyCount"], 0);
    assert!(!app.root().join("buckets/keep/letters/hello.txt").exists());

    let trash = body_json(app.send(get("/api/trash")).await).await;
    assert_eq!(trash["count"], 1);
    let entry = &trash["entries"][0];
    assert_eq!(entry["originalPath"], "buckets/keep/letters/hello.txt");
    assert_eq!(entry["bucket"], "keep");
    assert_eq!(entry["objectKey"], "letters/hello.txt");

    let resp = app
        .send(json_request(
            "POST",
            "/api/trash/restore",
            serde_json::json!({ "id": entry["id"] }),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app.send(get("/api/v1/buckets/keep/letters/hello.txt")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()["etag"].to_str().unwrap(),
        format!("\"{}\"", stored["etag"].as_str().unwrap())
    );
    assert_eq!(body_bytes(resp).await.as_ref(), b"dear reader");
}

#[tokio::test]
async fn concurrent_puts_leave_exactly_one_version() {
    let app = TestApp::new().await;
    let storage = app.state.storage.clone();
    storage.create_bucket("race").await.unwrap();

    let first = vec![b'a'; 256 * 1024];
    let second = vec![b'b'; 128 * 1024];

    let mut tasks = Vec::new();
    for payload in [first.clone(), second.clone(), first.clone(), second.clone()] {
        let storage = storage.clone();
        tasks.push(tokio::spawn(async move {
            let chunks = payload
                .chunks(8 * 1024)
                .map(|c| Ok::<_, io::Error>(bytes::Bytes::copy_from_slice(c)))
                .collect::<Vec<_>>();
            storage
                .put_object_stream("race", "shared.bin", None, futures::stream::iter(chunks))
                .await
        }));
    }
    let reader = {
        let storage = storage.clone();
        tokio::spawn(async move {
            for _ in 0..20 {
                match storage.get_object("race", "shared.bin").await {
                    Ok((meta, file)) => {
                        let len = file.metadata().await.unwrap().len();
                        assert!(len > 0);
                        assert_eq!(len as i64, meta.size_bytes);
                    }
                    Err(StorageError::ObjectNotFound { .. }) => {}
                    Err(err) => panic!("unexpected error: {}", err),
                }
                tokio::task::yield_now().await;
            }
        })
    };
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    reader.await.unwrap();

    let resp = app.send(get("/api/v1/buckets/race/shared.bin")).await;
    let stored = body_bytes(resp).await;
    assert!(stored.as_ref() == first.as_slice() || stored.as_ref() == second.as_slice());
    assert_eq!(app.state.storage.usage().await.unwrap().0, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn browser_reads_of_an_object_never_miss_an_overwrite() {
    let app = TestApp::new().await;
    let storage = app.state.storage.clone();
    storage.create_bucket("live").await.unwrap();
    storage
        .put_object_bytes("live", "doc/report.txt", None, bytes::Bytes::from_static(b"v0"))
        .await
        .unwrap();

    let writer = {
        let storage = storage.clone();
        tokio::spawn(async move {
            for round in 1..=30 {
                let content = bytes::Bytes::from(format!("v{}", round));
                storage
                    .put_object_bytes("live", "doc/report.txt", None, content)
                    .await
                    .unwrap();
            }
        })
    };
    let files = app.state.files.clone();
    let reader = tokio::spawn(async move {
        for _ in 0..200 {
            let (entry, file) = files.open_file("buckets/live/doc/report.txt").await.unwrap();
            assert_eq!(entry.size_bytes, file.metadata().await.unwrap().len());
            tokio::task::yield_now().await;
        }
    });
    writer.await.unwrap();
    reader.await.unwrap();

    let resp = app
        .send(get("/download?file=/buckets/live/doc/report.txt"))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_bytes(resp).await.as_ref(), b"v30");
}
