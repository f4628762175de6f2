//! HTTP surface tests over the in-memory context (ENV=test wiring).

use std::time::Duration;

use atelier_adapters::config::{
    AppConfig, Environment, ObjectStoreConfig, ServiceMode, WorkerConfig,
};
use atelier_server::{create_api_router, initialize, AppContext};
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://unused".to_string(),
        kv_url: "redis://unused".to_string(),
        jwt_secret: "test-secret-key".to_string(),
        port: 0,
        env: Environment::Test,
        log_level: "warn".to_string(),
        completion_api_key: String::new(),
        completion_api_url: "https://api.openai.com/v1/chat/completions".to_string(),
        object_store: ObjectStoreConfig {
            endpoint: String::new(),
            region: "us-east-1".to_string(),
            bucket: "test".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            force_path_style: true,
            root: "./target/test-artifacts".to_string(),
        },
        cdn_base_url: None,
        mode: ServiceMode::All,
        worker: WorkerConfig::default(),
        shutdown_grace: Duration::from_secs(5),
    }
}

async fn test_app() -> (Router, AppContext) {
    let ctx = initialize(test_config()).await.expect("bootstrap");
    (create_api_router(&ctx), ctx)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

async fn post_json(app: &Router, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let response = app
        .clone()
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

async fn get(app: &Router, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let response = app
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

async fn register(app: &Router) -> String {
    let (status, body) = post_json(
        app,
        "/api/auth/register",
        None,
        json!({"tenantName": "acme", "email": "ada@acme.dev", "password": "correct-horse"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["data"]["token"].as_str().unwrap().to_string()
}

fn linear_definition() -> Value {
    json!({
        "metadata": {"name": "demo", "version": 1},
        "entrypoint": "a",
        "nodes": {
            "a": {"id": "a", "type": "TRANSFORM", "config": {"template": {"done": "yes"}}, "next": []}
        },
        "edges": []
    })
}

#[tokio::test]
async fn register_login_and_guard() {
    let (app, _ctx) = test_app().await;
    let token = register(&app).await;

    // Login works with the same credentials.
    let (status, body) = post_json(
        &app,
        "/api/auth/login",
        None,
        json!({"email": "ada@acme.dev", "password": "correct-horse"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));

    // Missing token on a protected route yields the AUTH_ERROR envelope.
    let (status, body) = get(&app, "/api/workflows", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"]["code"], json!("AUTH_ERROR"));

    // A garbage token is rejected too.
    let (status, _) = get(&app, "/api/workflows", Some("not-a-token")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // A valid token passes.
    let (status, _) = get(&app, "/api/workflows", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let (app, _ctx) = test_app().await;
    register(&app).await;
    let (status, body) = post_json(
        &app,
        "/api/auth/register",
        None,
        json!({"tenantName": "other", "email": "ada@acme.dev", "password": "another-pass"}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], json!("CONFLICT"));
}

#[tokio::test]
async fn invalid_definition_reports_field_paths() {
    let (app, _ctx) = test_app().await;
    let token = register(&app).await;

    let bad = json!({
        "metadata": {"name": "demo", "version": 1},
        "entrypoint": "ghost",
        "nodes": {
            "a": {"id": "a", "type": "TRANSFORM", "config": {"template": {}}, "next": ["missing"]}
        },
        "edges": [{"from": "a", "to": "nowhere"}]
    });
    let (status, body) = post_json(
        &app,
        "/api/workflows",
        Some(&token),
        json!({"name": "bad", "definition": bad}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("VALIDATION_ERROR"));
    let details: Vec<String> = body["error"]["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert!(details.iter().any(|d| d.contains("entrypoint")));
    assert!(details.iter().any(|d| d.contains("next[0]")));
    assert!(details.iter().any(|d| d.contains("edges[0].to")));
}

#[tokio::test]
async fn workflow_crud_and_execute() {
    let (app, _ctx) = test_app().await;
    let token = register(&app).await;

    let (status, body) = post_json(
        &app,
        "/api/workflows",
        Some(&token),
        json!({"name": "demo", "definition": linear_definition()}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["version"], json!(1));

    // Update with a definition bumps the version.
    let (status, body) = {
        let request = Request::builder()
            .method("PUT")
            .uri(format!("/api/workflows/{id}"))
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::from(
                json!({"definition": linear_definition()}).to_string(),
            ))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        (status, body_json(response).await)
    };
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["version"], json!(2));

    // Execute answers 202 with the pending run.
    let (status, body) = post_json(
        &app,
        &format!("/api/workflows/{id}/execute"),
        Some(&token),
        json!({"input": {"x": 1}}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["status"], json!("PENDING"));
    let run_id = body["data"]["id"].as_str().unwrap().to_string();

    // The run is readable with its steps.
    let (status, body) = get(&app, &format!("/api/runs/{run_id}"), Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["steps"].as_array().unwrap().len(), 1);

    // Events with an unparsable `since` are served, not rejected.
    let (status, _) = get(
        &app,
        &format!("/api/runs/{run_id}/events?since=not-a-date"),
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn pagination_is_clamped() {
    let (app, _ctx) = test_app().await;
    let token = register(&app).await;

    let (status, body) = get(&app, "/api/workflows?page=0&limit=5000", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["page"], json!(1));
    assert_eq!(body["pagination"]["limit"], json!(100));
}

#[tokio::test]
async fn site_and_page_crud_with_conflicts() {
    let (app, _ctx) = test_app().await;
    let token = register(&app).await;

    let (status, body) = post_json(
        &app,
        "/api/sites",
        Some(&token),
        json!({"name": "Acme", "slug": "acme", "subdomain": "acme"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let site_id = body["data"]["id"].as_str().unwrap().to_string();

    // Duplicate subdomain conflicts.
    let (status, body) = post_json(
        &app,
        "/api/sites",
        Some(&token),
        json!({"name": "Other", "slug": "other", "subdomain": "acme"}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], json!("CONFLICT"));

    let (status, _) = post_json(
        &app,
        &format!("/api/sites/{site_id}/pages"),
        Some(&token),
        json!({"path": "/", "title": "Home", "content": {"sections": []}}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Duplicate path conflicts.
    let (status, _) = post_json(
        &app,
        &format!("/api/sites/{site_id}/pages"),
        Some(&token),
        json!({"path": "/", "title": "Again", "content": {"sections": []}}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Invalid path is a validation error.
    let (status, _) = post_json(
        &app,
        &format!("/api/sites/{site_id}/pages"),
        Some(&token),
        json!({"path": "no-slash", "title": "Bad", "content": {"sections": []}}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Publish answers 202 with the queued build.
    let (status, body) = post_json(
        &app,
        &format!("/api/sites/{site_id}/publish"),
        Some(&token),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["version"]["status"], json!("BUILDING"));
    assert_eq!(body["data"]["buildJob"]["status"], json!("QUEUED"));
}

#[tokio::test]
async fn serve_unknown_subdomain_is_plain_404() {
    let (app, _ctx) = test_app().await;
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/serve/nowhere")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn serve_round_trip_after_build() {
    let (app, ctx) = test_app().await;
    let token = register(&app).await;

    let (_, body) = post_json(
        &app,
        "/api/sites",
        Some(&token),
        json!({"name": "Acme", "slug": "acme", "subdomain": "acme"}),
    )
    .await;
    let site_id = body["data"]["id"].as_str().unwrap().to_string();

    post_json(
        &app,
        &format!("/api/sites/{site_id}/pages"),
        Some(&token),
        json!({"path": "/", "title": "Hello world", "content": {"sections": [
            {"type": "hero", "heading": "Hello world"}
        ]}}),
    )
    .await;

    post_json(
        &app,
        &format!("/api/sites/{site_id}/publish"),
        Some(&token),
        json!({}),
    )
    .await;

    // Drain the build queue inline instead of running the worker pool.
    use atelier_application::builder::{BuildPayload, BUILD_QUEUE};
    use atelier_ports::JobQueue;
    let payload = ctx
        .queue
        .pop(BUILD_QUEUE, Duration::from_secs(1))
        .await
        .unwrap()
        .expect("queued build");
    let job: BuildPayload = serde_json::from_value(payload).unwrap();
    ctx.build_engine.execute_build(&job).await.unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/serve/acme")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("X-Site-Version")
            .and_then(|v| v.to_str().ok()),
        Some("1")
    );
    assert_eq!(
        response
            .headers()
            .get(header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok()),
        Some("public, max-age=60, s-maxage=300")
    );
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    assert!(String::from_utf8(bytes.to_vec()).unwrap().contains("Hello world"));
}

#[tokio::test]
async fn rate_limiter_engages() {
    let (app, _ctx) = test_app().await;

    // Unauthenticated requests share the anonymous budget.
    let mut last = StatusCode::OK;
    for _ in 0..110 {
        let (status, _) = post_json(
            &app,
            "/api/auth/login",
            None,
            json!({"email": "ghost@acme.dev", "password": "wrong-pass"}),
        )
        .await;
        last = status;
        if status == StatusCode::TOO_MANY_REQUESTS {
            break;
        }
    }
    assert_eq!(last, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn health_reports_ok_in_test_mode() {
    let (app, _ctx) = test_app().await;
    let (status, body) = get(&app, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("healthy"));
}
