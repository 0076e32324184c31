#[path = "common/mod.rs"]
mod common;

use axum::{body::Body, http::Request, http::StatusCode};
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use tokio::sync::Mutex;
use tower::ServiceExt;

use common::{multipart_body, EnvGuard};
use flipscope::{app, build_state_from_env};

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

fn analyze_request(description: &str, caller: &str) -> Request<Body> {
    let (content_type, body) = multipart_body(&[("description", description)]);
    Request::builder()
        .method("POST")
        .uri("/api/analyze")
        .header("content-type", content_type)
        .header("x-forwarded-for", caller)
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn env_built_state_serves_health() {
    let _lock = ENV_MUTEX.lock().await;
    let mut env = EnvGuard::new();
    env.remove("FLIPSCOPE_RATE_LIMIT");
    env.remove("AUDIT_LOG_FILE");

    let state = build_state_from_env().await.unwrap();
    let app = app(state);
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unconfigured_provider_surfaces_500_and_env_rate_limit_holds() {
    let _lock = ENV_MUTEX.lock().await;
    let mut env = EnvGuard::new();
    env.set("FLIPSCOPE_RATE_LIMIT", "1");
    env.remove("FLIPSCOPE_REPORT_PROVIDER");
    env.remove("OLLAMA_URL");
    env.remove("EBAY_TOKEN");
    env.remove("FLIPSCOPE_STORE_URL");
    env.remove("AUDIT_LOG_FILE");

    let state = build_state_from_env().await.unwrap();
    let app = app(state);

    // Report generation has no endpoint, so enrichment fails downstream.
    let first = app
        .clone()
        .oneshot(analyze_request("vintage omega watch", "10.3.0.1"))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let bytes = first.into_body().collect().await.unwrap().to_bytes();
    let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(v["kind"], serde_json::json!("collaborator"));
    assert!(v["error"].as_str().unwrap().contains("OLLAMA_URL"));

    // The failed attempt still consumed the caller's budget of one.
    let second = app
        .oneshot(analyze_request("vintage omega watch", "10.3.0.1"))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}
