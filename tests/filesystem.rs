mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{TestApp, body_bytes, body_json, get, json_request, multipart_body};
use serde_json::json;
use std::fs;

#[tokio::test]
async fn browse_hides_server_directories() {
    let app = TestApp::new().await;
    fs::write(app.root().join("readme.md"), b"# hi").unwrap();
    fs::create_dir(app.root().join("music")).unwrap();

    let listing = body_json(app.send(get("/files?path=/")).await).await;
    assert_eq!(listing["isDir"], true);
    let names: Vec<&str> = listing["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["buckets", "music", "readme.md"]);

    let resp = app.send(get("/files?path=/.beamdrop_data")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = app.send(get("/download?file=/.beamdrop_data/master.key")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = app.send(get("/files?path=../etc")).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn download_preview_and_file_view() {
    let app = TestApp::new().await;
    fs::write(app.root().join("notes.txt"), b"line one\nline two\n").unwrap();

    let resp = app.send(get("/download?file=/notes.txt")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()["content-disposition"],
        "attachment; filename=\"notes.txt\""
    );
    assert_eq!(body_bytes(resp).await.as_ref(), b"line one\nline two\n");

    let resp = app.send(get("/preview?file=notes.txt")).await;
    assert!(
        resp.headers()["content-disposition"]
            .to_str()
            .unwrap()
            .starts_with("inline")
    );

    let req = Request::builder()
        .uri("/files?path=/notes.txt")
        .header("range", "bytes=-4")
        .body(Body::empty())
        .unwrap();
    let resp = app.send(req).await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(body_bytes(resp).await.as_ref(), b"two\n");
}

#[tokio::test]
async fn mkdir_write_rename_move_copy() {
    let app = TestApp::new().await;
    let root = app.root();

    let resp = app
        .send(json_request("POST", "/mkdir", json!({ "dirPath": "/projects/demo" })))
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert!(root.join("projects/demo").is_dir());

    let resp = app
        .send(json_request(
            "POST",
            "/write",
            json!({ "filePath": "/projects/demo/todo.txt", "content": "ship it" }),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(fs::read_to_string(root.join("projects/demo/todo.txt")).unwrap(), "ship it");

    let resp = app
        .send(json_request(
            "POST",
            "/rename",
            json!({ "oldPath": "/projects/demo/todo.txt", "newName": "done.txt" }),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(root.join("projects/demo/done.txt").exists());
    assert!(!root.join("projects/demo/todo.txt").exists());

    fs::create_dir(root.join("archive")).unwrap();
    let resp = app
        .send(json_request(
            "POST",
            "/move",
            json!({ "sourcePath": "/projects/demo/done.txt", "targetPath": "/archive" }),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["path"], "archive/done.txt");
    assert!(root.join("archive/done.txt").exists());

    let resp = app
        .send(json_request(
            "POST",
            "/copy",
            json!({ "sourcePath": "/archive", "targetPath": "/backup" }),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(fs::read_to_string(root.join("backup/done.txt")).unwrap(), "ship it");
    assert!(root.join("archive/done.txt").exists());

    fs::write(root.join("clash.txt"), b"x").unwrap();
    let resp = app
        .send(json_request(
            "POST",
            "/copy",
            json!({ "sourcePath": "/archive/done.txt", "targetPath": "/clash.txt" }),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn buckets_directory_is_read_only() {
    let app = TestApp::new().await;
    app.state.storage.create_bucket("locked").await.unwrap();

    let resp = app
        .send(json_request("POST", "/mkdir", json!({ "dirPath": "/buckets/locked/sub" })))
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = app
        .send(json_request(
            "POST",
            "/write",
            json!({ "filePath": "/.beamdrop_data/evil", "content": "x" }),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn upload_search_and_trash_round_trip() {
    let app = TestApp::new().await;
    fs::create_dir(app.root().join("inbox")).unwrap();

    let (content_type, body) = multipart_body("files", "Holiday-Photo.JPG", b"jpegdata");
    let req = Request::builder()
        .method("POST")
        .uri("/upload?path=/inbox")
        .header("content-type", content_type)
        .body(Body::from(body))
        .unwrap();
    let resp = app.send(req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(
        fs::read(app.root().join("inbox/Holiday-Photo.JPG")).unwrap(),
        b"jpegdata"
    );

    let found = body_json(app.send(get("/search?q=holiday")).await).await;
    assert_eq!(found["count"], 1);
    assert_eq!(found["results"][0]["path"], "inbox/Holiday-Photo.JPG");
    let found = body_json(app.send(get("/search?q=*.jpg&path=/inbox")).await).await;
    assert_eq!(found["count"], 1);
    let found = body_json(app.send(get("/search?q=*.png")).await).await;
    assert_eq!(found["count"], 0);

    let resp = app
        .send(json_request(
            "POST",
            "/trash",
            json!({ "sourcePath": "/inbox/Holiday-Photo.JPG" }),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let entry = body_json(resp).await;
    assert!(!app.root().join("inbox/Holiday-Photo.JPG").exists());

    let listing = body_json(app.send(get("/files?path=/inbox")).await).await;
    assert_eq!(listing["files"], json!([]));

    // Occupy the original path so restore must refuse.
    fs::write(app.root().join("inbox/Holiday-Photo.JPG"), b"newer").unwrap();
    let resp = app
        .send(json_request("POST", "/api/trash/restore", json!({ "id": entry["id"] })))
        .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    fs::remove_file(app.root().join("inbox/Holiday-Photo.JPG")).unwrap();
    let resp = app
        .send(json_request("POST", "/api/trash/restore", json!({ "id": entry["id"] })))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        fs::read(app.root().join("inbox/Holiday-Photo.JPG")).unwrap(),
        b"jpegdata"
    );
    let trash = body_json(app.send(get("/api/trash")).await).await;
    assert_eq!(trash["count"], 0);
}

#[tokio::test]
async fn purge_removes_trash_permanently() {
    let app = TestApp::new().await;
    fs::write(app.root().join("junk.log"), b"noise").unwrap();
    let entry = app.state.files.trash("junk.log").await.unwrap();

    let uri = format!("/api/trash/purge?id={}", entry.id);
    let resp = app
        .send(Request::builder().method("DELETE").uri(&uri).body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(!app.root().join(".beamdrop_trash").join(&entry.trashed_name).exists());

    let resp = app
        .send(Request::builder().method("DELETE").uri(&uri).body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
