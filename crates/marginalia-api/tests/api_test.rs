//! HTTP tests driving the router with in-memory notes and a temp-dir blob store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use marginalia_api::{build_router, AppState, ServerConfig};
use marginalia_core::memory::MemoryNoteStore;
use marginalia_db::FsBlobStore;

const BOUNDARY: &str = "marginalia-test-boundary";

struct TestApp {
    router: Router,
    dir: TempDir,
}

fn spawn_app_with(extra: &[(&str, &str)]) -> TestApp {
    let dir = TempDir::new().unwrap();
    let mut vars: HashMap<String, String> = HashMap::from([
        ("JWT_SECRET".to_string(), "test-secret-test-secret-test-secret".to_string()),
        ("PUBLIC_BASE_URL".to_string(), "http://test.local".to_string()),
        ("MAX_UPLOAD_BYTES".to_string(), "1024".to_string()),
        ("RATE_LIMIT_ENABLED".to_string(), "false".to_string()),
    ]);
    for (k, v) in extra {
        vars.insert(k.to_string(), v.to_string());
    }
    let config = ServerConfig::from_lookup(|name| vars.get(name).cloned()).unwrap();

    let notes = Arc::new(MemoryNoteStore::new());
    let blobs = Arc::new(FsBlobStore::new(dir.path(), config.max_upload_bytes));
    let state = AppState::new(config, notes.clone(), notes, blobs);

    TestApp {
        router: build_router(state),
        dir,
    }
}

fn spawn_app() -> TestApp {
    spawn_app_with(&[])
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    async fn json(&self, method: &str, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn delete(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("DELETE")
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    async fn register(&self, username: &str) -> String {
        let (status, body) = self
            .json(
                "POST",
                "/api/auth/register",
                None,
                json!({
                    "username": username,
                    "email": format!("{}@example.com", username),
                    "password": "secret1",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["token"].as_str().unwrap().to_string()
    }

    async fn create_note(&self, token: &str, content: &str, hashtags: &[&str]) -> String {
        let (status, body) = self
            .json(
                "POST",
                "/api/notes",
                Some(token),
                json!({ "content": content, "type": "text", "hashtags": hashtags }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["id"].as_str().unwrap().to_string()
    }

    async fn upload(
        &self,
        token: &str,
        note_id: &str,
        field: &str,
        filename: &str,
        data: &[u8],
    ) -> (StatusCode, Value) {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: text/plain\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        let request = Request::builder()
            .method("POST")
            .uri(format!("/api/notes/{}/attachments", note_id))
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }

    fn stored_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }
}

#[tokio::test]
async fn test_health() {
    let app = spawn_app();
    let (status, body) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let app = spawn_app();
    let response = app
        .router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_openapi_document_lists_note_routes() {
    let app = spawn_app();
    let (status, body) = app.get("/openapi.json", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/notes"].is_object());
    assert!(body["paths"]["/api/notes/reorder"].is_object());
}

#[tokio::test]
async fn test_register_and_login() {
    let app = spawn_app();
    app.register("alice").await;

    let (status, body) = app
        .json(
            "POST",
            "/api/auth/register",
            None,
            json!({"username": "alice", "email": "other@example.com", "password": "secret1"}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].is_string());

    let (status, _) = app
        .json(
            "POST",
            "/api/auth/register",
            None,
            json!({"username": "bob", "email": "bob@example.com", "password": "123"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .json(
            "POST",
            "/api/auth/login",
            None,
            json!({"login": "alice@example.com", "password": "secret1"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["username"], "alice");
    assert!(body["user"].get("password_hash").is_none());

    let (status, _) = app
        .json(
            "POST",
            "/api/auth/login",
            None,
            json!({"login": "alice", "password": "wrong!!"}),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_note_routes_require_token() {
    let app = spawn_app();
    let (status, _) = app.get("/api/notes", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app.get("/api/notes", Some("not-a-jwt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_create_and_list_note_aggregate() {
    let app = spawn_app();
    let token = app.register("alice").await;

    let (status, created) = app
        .json(
            "POST",
            "/api/notes",
            Some(token.as_str()),
            json!({"content": "buy milk", "hashtags": ["#todo", " #home ", "#todo", ""]}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["type"], "text");
    assert_eq!(created["hashtags"], json!(["#todo", "#home"]));
    assert_eq!(created["attachments"], json!([]));

    let (status, listing) = app.get("/api/notes", Some(token.as_str())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["hasMore"], false);
    let notes = listing["notes"].as_array().unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0]["id"], created["id"]);
    assert_eq!(notes[0]["content"], "buy milk");
    assert_eq!(notes[0]["hashtags"], json!(["#todo", "#home"]));
    assert_eq!(notes[0]["attachments"], json!([]));
}

#[tokio::test]
async fn test_create_rejects_invalid_input() {
    let app = spawn_app();
    let token = app.register("alice").await;

    let (status, _) = app
        .json("POST", "/api/notes", Some(token.as_str()), json!({"content": "   "}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .json(
            "POST",
            "/api/notes",
            Some(token.as_str()),
            json!({"content": "x", "type": "markdown"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .json(
            "POST",
            "/api/notes",
            Some(token.as_str()),
            json!({"content": "x", "hashtags": ["#".repeat(101)]}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_pagination_bounds() {
    let app = spawn_app();
    let token = app.register("alice").await;
    for i in 0..3 {
        app.create_note(&token, &format!("n{}", i), &[]).await;
    }

    let (status, page) = app.get("/api/notes?limit=2", Some(token.as_str())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["notes"].as_array().unwrap().len(), 2);
    assert_eq!(page["hasMore"], true);

    let (status, page) = app.get("/api/notes?offset=2&limit=2", Some(token.as_str())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["notes"].as_array().unwrap().len(), 1);
    assert_eq!(page["hasMore"], false);

    for query in ["limit=0", "limit=101", "offset=-1"] {
        let (status, _) = app.get(&format!("/api/notes?{}", query), Some(token.as_str())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", query);
    }
}

#[tokio::test]
async fn test_update_is_owner_scoped() {
    let app = spawn_app();
    let alice = app.register("alice").await;
    let mallory = app.register("mallory").await;
    let note_id = app.create_note(&alice, "v1", &["#a"]).await;

    let uri = format!("/api/notes/{}", note_id);
    let (status, _) = app
        .json("PUT", &uri, Some(mallory.as_str()), json!({"content": "pwned", "hashtags": []}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .json(
            "PUT",
            &uri,
            Some(alice.as_str()),
            json!({"content": "v2", "type": "code", "hashtags": ["#b"]}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].is_string());

    let (_, listing) = app.get("/api/notes", Some(alice.as_str())).await;
    let note = &listing["notes"][0];
    assert_eq!(note["content"], "v2");
    assert_eq!(note["type"], "code");
    assert_eq!(note["hashtags"], json!(["#b"]));

    let (status, _) = app
        .json("PUT", "/api/notes/not-a-uuid", Some(alice.as_str()), json!({"content": "x"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reorder_assigns_positions_and_counts_skips() {
    let app = spawn_app();
    let alice = app.register("alice").await;
    let bob = app.register("bob").await;
    let a = app.create_note(&alice, "a", &[]).await;
    let b = app.create_note(&alice, "b", &[]).await;
    let c = app.create_note(&alice, "c", &[]).await;
    let foreign = app.create_note(&bob, "bob's", &[]).await;

    let (status, body) = app
        .json(
            "PUT",
            "/api/notes/reorder",
            Some(alice.as_str()),
            json!({"noteIds": [a, c, b, foreign, "garbage"]}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], 3);
    assert_eq!(body["skipped"], 2);

    let (_, listing) = app.get("/api/notes", Some(alice.as_str())).await;
    let order: Vec<&str> = listing["notes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["content"].as_str().unwrap())
        .collect();
    assert_eq!(order, vec!["a", "c", "b"]);
    let positions: Vec<i64> = listing["notes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["position"].as_i64().unwrap())
        .collect();
    assert_eq!(positions, vec![0, 1, 2]);

    let (_, bobs) = app.get("/api/notes", Some(bob.as_str())).await;
    assert_eq!(bobs["notes"][0]["position"], -1);
}

#[tokio::test]
async fn test_upload_serve_and_remove_attachment() {
    let app = spawn_app();
    let token = app.register("alice").await;
    let note_id = app.create_note(&token, "with file", &[]).await;

    let (status, att) = app
        .upload(&token, &note_id, "file", "hello world.txt", b"hello")
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", att);
    assert_eq!(att["noteId"], note_id.as_str());
    assert_eq!(att["originalName"], "hello world.txt");
    assert_eq!(att["mimeType"], "text/plain");
    assert_eq!(att["size"], 5);
    let filename = att["filename"].as_str().unwrap().to_string();
    assert!(filename.ends_with("_hello_world.txt"), "{}", filename);
    assert_eq!(att["url"], format!("http://test.local/uploads/{}", filename));
    assert_eq!(app.stored_files(), vec![filename.clone()]);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::get(format!("/uploads/{}", filename))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"hello");

    let (_, listing) = app.get("/api/notes", Some(token.as_str())).await;
    assert_eq!(listing["notes"][0]["attachments"][0]["id"], att["id"]);

    let uri = format!(
        "/api/notes/{}/attachments/{}",
        note_id,
        att["id"].as_str().unwrap()
    );
    let (status, _) = app.delete(&uri, &token).await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.stored_files().is_empty());

    let (status, _) = app.get(&format!("/uploads/{}", filename), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.delete(&uri, &token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_rejections_write_nothing() {
    let app = spawn_app();
    let alice = app.register("alice").await;
    let mallory = app.register("mallory").await;
    let note_id = app.create_note(&alice, "mine", &[]).await;

    let (status, _) = app
        .upload(&alice, &note_id, "file", "big.bin", &[7u8; 2000])
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    let (status, body) = app
        .upload(&alice, &note_id, "attachment", "a.txt", b"x")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No file provided");

    let (status, _) = app
        .upload(&mallory, &note_id, "file", "a.txt", b"x")
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert!(app.stored_files().is_empty());
}

#[tokio::test]
async fn test_delete_note_purges_blobs() {
    let app = spawn_app();
    let token = app.register("alice").await;
    let note_id = app.create_note(&token, "doomed", &["#x"]).await;
    let (status, _) = app.upload(&token, &note_id, "file", "a.txt", b"a").await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = app.upload(&token, &note_id, "file", "b.txt", b"b").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(app.stored_files().len(), 2);

    let (status, _) = app.delete(&format!("/api/notes/{}", note_id), &token).await;
    assert_eq!(status, StatusCode::OK);

    let (_, listing) = app.get("/api/notes", Some(token.as_str())).await;
    assert_eq!(listing["notes"], json!([]));

    for _ in 0..50 {
        if app.stored_files().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(app.stored_files().is_empty());

    let (status, _) = app.delete(&format!("/api/notes/{}", note_id), &token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rate_limit_returns_429() {
    let app = spawn_app_with(&[
        ("RATE_LIMIT_ENABLED", "true"),
        ("RATE_LIMIT_REQUESTS", "2"),
        ("RATE_LIMIT_PERIOD_SECS", "60"),
    ]);
    assert_eq!(app.get("/health", None).await.0, StatusCode::OK);
    assert_eq!(app.get("/health", None).await.0, StatusCode::OK);

    let (status, body) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "rate_limit_exceeded");
}
