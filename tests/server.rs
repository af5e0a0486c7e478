mod common;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use common::{Fixture, REPO, SECRET, push_payload};
use git_publish::config::PublishConfig;
use git_publish::storage::MemoryStore;
use git_publish::webhook::compute_signature_256;
use git_publish::{AppState, api};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

fn app(config: PublishConfig, store: &Arc<MemoryStore>) -> Router {
    api::build_router(Arc::new(AppState::new(config, store.clone(), None)))
}

fn delivery(uri: &str, event: &str, id: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-github-event", event)
        .header("x-github-delivery", id)
        .header("x-hub-signature-256", compute_signature_256(SECRET, body.as_bytes()))
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn unsigned_delivery_is_unauthorized() {
    let fixture = Fixture::new();
    let store = Arc::new(MemoryStore::new("my-bucket"));
    let app = app(fixture.config(""), &store);

    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("x-github-event", "push")
        .header("x-github-delivery", "d1")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(body_text(response).await.contains("X-Hub-Signature"));
}

#[tokio::test]
async fn wrong_signature_is_unauthorized() {
    let fixture = Fixture::new();
    let store = Arc::new(MemoryStore::new("my-bucket"));
    let app = app(fixture.config(""), &store);

    let mut request = delivery("/webhook", "push", "d1", "{}");
    request.headers_mut().insert(
        "x-hub-signature-256",
        compute_signature_256("other", b"{}").parse().unwrap(),
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(store.keys().is_empty());
}

#[tokio::test]
async fn missing_event_type_is_unprocessable() {
    let fixture = Fixture::new();
    let store = Arc::new(MemoryStore::new("my-bucket"));
    let app = app(fixture.config(""), &store);

    let mut request = delivery("/webhook", "push", "d1", "{}");
    request.headers_mut().remove("x-github-event");
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn ping_is_acknowledged_and_recorded() {
    let fixture = Fixture::new();
    let store = Arc::new(MemoryStore::new("my-bucket"));
    let app = app(fixture.config(""), &store);

    let response = app
        .clone()
        .oneshot(delivery("/webhook", "ping", "ping-1", r#"{"zen":"hi"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_json(response).await["ignored"].is_string());

    let response = app.oneshot(get("/deliveries/ping-1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let record = body_json(response).await;
    assert_eq!(record["status"], "ignored");
    assert_eq!(record["eventType"], "ping");
}

#[tokio::test]
async fn signed_garbage_is_a_bad_request() {
    let fixture = Fixture::new();
    let store = Arc::new(MemoryStore::new("my-bucket"));
    let app = app(fixture.config(""), &store);

    let response = app
        .oneshot(delivery("/webhook", "push", "d1", "not json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tag_pushes_are_ignored() {
    let fixture = Fixture::new();
    let store = Arc::new(MemoryStore::new("my-bucket"));
    let app = app(fixture.config(""), &store);

    let body = serde_json::json!({
        "ref": "refs/tags/v1",
        "after": fixture.remote_head(),
        "repository": { "full_name": REPO },
        "commits": [{ "added": ["site/old.html"] }]
    })
    .to_string();
    let response = app
        .oneshot(delivery("/webhook", "push", "d1", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_json(response).await["ignored"].is_string());
    assert!(store.keys().is_empty());
}

#[tokio::test]
async fn push_runs_the_pipeline_and_reports() {
    let fixture = Fixture::new();
    fixture.write("site/a.html", "<h1>a</h1>\n");
    let head = fixture.commit_and_push("add a");
    let store = Arc::new(MemoryStore::new("my-bucket"));
    let app = app(fixture.config(""), &store);

    let body = push_payload(&head, &["site/a.html"], &[], &[]);
    let response = app
        .clone()
        .oneshot(delivery("/webhook", "push", "d1", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["upload"], 1);
    assert_eq!(report["delete"], 0);
    assert!(report["cloudFront"].is_null());
    assert_eq!(report["headCommit"], head.as_str());
    assert_eq!(store.keys(), vec!["a.html".to_string()]);

    let response = app.clone().oneshot(get("/status?status=success")).await.unwrap();
    let status = body_json(response).await;
    assert_eq!(status["deliveries"]["filtered_count"], 1);
    assert_eq!(status["deliveries"]["filtered"][0]["id"], "d1");
    assert_eq!(status["config"]["bucket"], "my-bucket");

    let response = app.oneshot(get("/objects")).await.unwrap();
    let listing = body_json(response).await;
    assert_eq!(listing["count"], 1);
    assert_eq!(listing["objects"][0]["key"], "a.html");
}

#[tokio::test]
async fn failed_step_returns_500_with_full_report() {
    let fixture = Fixture::new();
    fixture.write("site/a.html", "a");
    fixture.write("site/b.html", "b");
    let head = fixture.commit_and_push("two files");
    let store = Arc::new(MemoryStore::new("my-bucket"));
    store.fail_key("b.html");
    let app = app(fixture.config(""), &store);

    let body = push_payload(&head, &["site/a.html", "site/b.html"], &[], &[]);
    let response = app
        .clone()
        .oneshot(delivery("/webhook", "push", "d1", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let report = body_json(response).await;
    assert_eq!(report["upload"], 1);
    assert_eq!(report["failures"][0]["key"], "b.html");

    let response = app.oneshot(get("/deliveries/d1")).await.unwrap();
    assert_eq!(body_json(response).await["status"], "failed");
}

#[tokio::test]
async fn dry_run_header_skips_side_effects() {
    let fixture = Fixture::new();
    fixture.write("site/a.html", "a");
    let head = fixture.commit_and_push("add a");
    let store = Arc::new(MemoryStore::new("my-bucket"));
    let app = app(fixture.config(""), &store);

    let body = push_payload(&head, &["site/a.html"], &[], &[]);
    let mut request = delivery("/webhook", "push", "d1", &body);
    request.headers_mut().insert("x-dry-run", "1".parse().unwrap());
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["dryRun"], true);
    assert!(report["delete"].is_null());
    assert!(store.keys().is_empty());
}

#[tokio::test]
async fn other_branches_are_ignored_when_one_is_configured() {
    let fixture = Fixture::new();
    let store = Arc::new(MemoryStore::new("my-bucket"));
    let mut config = fixture.config("");
    config.repository.branch = Some("production".into());
    let app = app(config, &store);

    let body = push_payload(&fixture.remote_head(), &["site/old.html"], &[], &[]);
    let response = app
        .oneshot(delivery("/webhook", "push", "d1", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_json(response).await["ignored"].is_string());
    assert!(store.keys().is_empty());
}

#[tokio::test]
async fn repeated_deliveries_are_rate_limited() {
    let fixture = Fixture::new();
    let store = Arc::new(MemoryStore::new("my-bucket"));
    let app = app(
        fixture.config("[rate_limit]\nmax_requests = 1\nwindow_secs = 60\n"),
        &store,
    );

    let body = push_payload(&fixture.remote_head(), &[], &["site/old.html"], &[]);
    let response = app
        .clone()
        .oneshot(delivery("/webhook?dry_run=true", "push", "d1", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(delivery("/webhook?dry_run=true", "push", "d2", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn unknown_delivery_is_not_found() {
    let fixture = Fixture::new();
    let store = Arc::new(MemoryStore::new("my-bucket"));
    let response = app(fixture.config(""), &store)
        .oneshot(get("/deliveries/nope"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn root_answers_in_text_and_json() {
    let fixture = Fixture::new();
    let store = Arc::new(MemoryStore::new("my-bucket"));
    let app = app(fixture.config(""), &store);

    let response = app.clone().oneshot(get("/")).await.unwrap();
    assert!(body_text(response).await.contains("my-bucket"));

    let response = app.oneshot(get("/?format=json")).await.unwrap();
    assert_eq!(body_json(response).await["name"], "git_publish");
}
