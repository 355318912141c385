mod common;

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use candle_core::Device;
use codegen_serve::api::server::create_router;
use codegen_serve::error::NOT_READY_MESSAGE;
use codegen_serve::AppState;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{StubLoader, StubModel};

fn app_with(model: Option<StubModel>, static_dir: &Path) -> Router {
    let state = Arc::new(AppState::new(Device::Cpu));
    if let Some(model) = model {
        state.init(&StubLoader::new(model)).unwrap();
    }
    create_router(state, static_dir)
}

fn encode_query(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => (b as char).to_string(),
            _ => format!("%{b:02X}"),
        })
        .collect()
}

fn get_generate(prompt: &str) -> Request<Body> {
    Request::builder()
        .uri(format!("/api/generate/?prompt={}", encode_query(prompt)))
        .body(Body::empty())
        .unwrap()
}

fn post_generate(body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/api/generate/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn health_reports_initializing_before_init() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(None, dir.path());

    let request = Request::builder().uri("/api/health").body(Body::empty()).unwrap();
    let (status, body) = send(app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"status": "initializing", "device": "cpu", "model_loaded": false, "tokenizer_loaded": false})
    );
}

#[tokio::test]
async fn health_reports_healthy_after_init() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(Some(StubModel::Identity), dir.path());

    let request = Request::builder().uri("/api/health").body(Body::empty()).unwrap();
    let (_, body) = send(app, request).await;

    assert_eq!(body["status"], "healthy");
    assert_eq!(body["model_loaded"], true);
    assert_eq!(body["tokenizer_loaded"], true);
}

#[tokio::test]
async fn query_and_body_transports_agree_when_ready() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(Some(StubModel::Identity), dir.path());

    let (get_status, get_body) = send(app.clone(), get_generate("let x = 1 ;")).await;
    let (post_status, post_body) = send(app, post_generate(json!({"prompt": "let x = 1 ;"}))).await;

    assert_eq!(get_status, StatusCode::OK);
    assert_eq!(post_status, StatusCode::OK);
    assert_eq!(get_body, json!({"status": true, "generated_code": "let x = 1 ;"}));
    assert_eq!(get_body, post_body);
}

#[tokio::test]
async fn query_and_body_transports_agree_when_not_ready() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(None, dir.path());

    let (get_status, get_body) = send(app.clone(), get_generate("x")).await;
    let (post_status, post_body) = send(app, post_generate(json!({"prompt": "x"}))).await;

    assert_eq!(get_status, StatusCode::OK);
    assert_eq!(post_status, StatusCode::OK);
    assert_eq!(get_body, json!({"status": false, "error": NOT_READY_MESSAGE}));
    assert_eq!(get_body, post_body);
}

#[tokio::test]
async fn inference_errors_use_the_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(Some(StubModel::Failing), dir.path());

    let (status, body) = send(app, post_generate(json!({"prompt": "fn main"}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], false);
    assert!(body.get("generated_code").is_none());
    assert!(body["error"].as_str().unwrap().contains("device lost"));
}

#[tokio::test]
async fn out_of_range_prompts_are_rejected_at_the_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(Some(StubModel::Identity), dir.path());
    let too_long = "x".repeat(513);

    for request in [
        get_generate(""),
        get_generate(&too_long),
        post_generate(json!({"prompt": ""})),
        post_generate(json!({"prompt": too_long})),
    ] {
        let (status, body) = send(app.clone(), request).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"].is_string());
    }
}

#[tokio::test]
async fn longest_allowed_prompt_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(Some(StubModel::Identity), dir.path());

    let (status, body) = send(app, post_generate(json!({"prompt": "x".repeat(512)}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], true);
}

#[tokio::test]
async fn missing_prompt_is_a_client_error() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(Some(StubModel::Identity), dir.path());

    let request = Request::builder().uri("/api/generate/").body(Body::empty()).unwrap();
    let (status, _) = send(app.clone(), request).await;
    assert!(status.is_client_error());

    let (status, _) = send(app, post_generate(json!({"text": "x"}))).await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn route_without_trailing_slash_is_served() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(Some(StubModel::Identity), dir.path());

    let request = Request::builder()
        .uri("/api/generate?prompt=x")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": true, "generated_code": "x"}));
}

#[tokio::test]
async fn serves_index_and_static_assets() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<html>demo</html>").unwrap();
    std::fs::write(dir.path().join("app.js"), "console.log('hi');").unwrap();
    let app = app_with(None, dir.path());

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"<html>demo</html>");

    let response = app
        .oneshot(Request::builder().uri("/static/app.js").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn cross_origin_requests_are_allowed() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(None, dir.path());

    let request = Request::builder()
        .uri("/api/health")
        .header(header::ORIGIN, "http://example.com")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(
        response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "*"
    );
}
