//! HTTP control surface tests

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use clawctl::server::router;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::common::Harness;

fn deploy_body() -> Value {
    json!({
        "projectId": "acme-agents",
        "zone": "us-central1-a",
        "vmName": "claw",
        "machineType": "e2-small",
        "branding": { "botName": "Dyno" },
        "models": { "primary": "google/gemini-2.5-flash" },
        "plugins": ["postiz"],
        "skills": ["daily-briefing"],
        "apiKeys": { "telegram-bot-token": "123:abc" }
    })
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn deployed(app: &Router) -> String {
    let (status, body) = send(app, post("/deploy", deploy_body())).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["deploymentId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let app = router(Harness::new().state);
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_deploy_reports_steps() {
    let app = router(Harness::new().state);
    let (status, body) = send(&app, post("/deploy", deploy_body())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let steps = body["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 11);
    assert_eq!(steps[0]["name"], "enable_apis");
    assert_eq!(steps[10]["name"], "verify_health");
    assert_eq!(body["missingSecrets"], json!(["postiz-url", "postiz-api-key"]));
}

#[tokio::test]
async fn test_deploy_unknown_plugin_is_bad_request() {
    let h = Harness::new();
    let app = router(h.state.clone());
    let mut body = deploy_body();
    body["plugins"] = json!(["nope"]);

    let (status, body) = send(&app, post("/deploy", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("nope"));
    assert_eq!(h.cloud.call_count(), 0);
}

#[tokio::test]
async fn test_status_and_logs() {
    let app = router(Harness::new().state);
    let id = deployed(&app).await;

    let (status, body) = send(&app, get(&format!("/status?deploymentId={}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "RUNNING");

    let (status, body) = send(&app, get(&format!("/status?deployment_id={}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["internalIp"], "10.128.0.2");

    let (status, body) = send(&app, get(&format!("/logs?deploymentId={}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["output"].as_str().unwrap().contains("agent health: active"));
}

#[tokio::test]
async fn test_unknown_deployment_is_not_found() {
    let app = router(Harness::new().state);
    let (status, body) = send(&app, get("/status?deploymentId=missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_vm_actions() {
    let app = router(Harness::new().state);
    let id = deployed(&app).await;

    let (status, body) = send(
        &app,
        post("/vm", json!({ "deploymentId": id, "action": "stop" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true }));

    let (_, body) = send(&app, get(&format!("/status?deploymentId={}", id))).await;
    assert_eq!(body["status"], "TERMINATED");

    let (status, body) = send(
        &app,
        post("/vm", json!({ "deploymentId": id, "action": "hibernate" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("hibernate"), "{}", body);
}

#[tokio::test]
async fn test_malformed_body_is_json_error() {
    let app = router(Harness::new().state);
    let request = Request::builder()
        .method("POST")
        .uri("/deploy")
        .header("content-type", "application/json")
        .body(Body::from("{\"projectId\": "))
        .unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_missing_deployment_id_is_json_error() {
    let app = router(Harness::new().state);
    let (status, body) = send(&app, get("/status")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("deployment"), "{}", body);
}

#[tokio::test]
async fn test_update_and_list() {
    let app = router(Harness::new().state);
    let id = deployed(&app).await;

    let (status, _) = send(
        &app,
        post(
            "/update",
            json!({ "deploymentId": id, "branding": { "botName": "Dyno Two" } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, get("/deployments")).await;
    assert_eq!(status, StatusCode::OK);
    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"], id.as_str());
    assert_eq!(list[0]["status"], "running");
}

#[tokio::test]
async fn test_secrets_and_missing_config() {
    let app = router(Harness::new().state);
    let id = deployed(&app).await;

    let (status, body) = send(&app, get(&format!("/deployments/{}/missing-config", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["missing"].as_array().unwrap().len(), 2);

    let (status, _) = send(
        &app,
        post(
            "/secrets",
            json!({ "deploymentId": id, "secretName": "postiz-api-key", "value": "k" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, get(&format!("/deployments/{}/missing-config", id))).await;
    assert_eq!(
        body["missing"],
        json!([{ "pluginId": "postiz", "secretName": "postiz-url" }])
    );

    let (status, _) = send(
        &app,
        post(
            "/secrets",
            json!({ "deploymentId": id, "secretName": "bogus", "value": "k" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_with_warning() {
    let h = Harness::new();
    let app = router(h.state.clone());
    let id = deployed(&app).await;
    h.cloud.fail_next(
        "delete_router",
        clawctl::cloud::CloudError::Api {
            status: 403,
            message: "denied".into(),
        },
    );

    let (status, body) = send(&app, post("/delete", json!({ "deploymentId": id }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let warnings = body["warnings"].as_array().unwrap();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].as_str().unwrap().starts_with("router: "));
}
