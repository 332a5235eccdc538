use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use chrono::Utc;
use db::DBService;
use portal::{
    LookbackWindow, PersistenceStore, PortalConfig, ProviderGateway,
    gateway::{ProviderError, ProviderPrompt, ProviderReply, ReasoningProvider, roles},
    signals::{RawSignal, SourceError, TrendSource},
};
use serde_json::{Value, json};
use server::{AppState, middleware::REQUEST_ID_HEADER, routes};
use tower::ServiceExt;
use uuid::Uuid;

struct CannedProvider;

#[async_trait]
impl ReasoningProvider for CannedProvider {
    fn name(&self) -> &str {
        "primary"
    }

    async fn send(
        &self,
        role: &str,
        _prompt: &ProviderPrompt,
        _timeout: Duration,
    ) -> Result<ProviderReply, ProviderError> {
        let body = match role {
            roles::COPYWRITER => r#"{"plan": "Savings-led", "copy": "Set a fare alert and fly for less."}"#,
            roles::FUTURIST => r#"{"name": "Price-watching travellers"}"#,
            roles::BELIEVER => r#"{"reply": "I'd sign up today.", "agrees": true}"#,
            roles::SKEPTIC => r#"{"reply": "Fine, the offer is clear.", "agrees": true}"#,
            roles::MODERATOR => {
                r#"{"recommendation": "accept", "rationale": "Clear offer", "confidence": 0.8}"#
            }
            other => return Err(ProviderError::Permanent(format!("unexpected role {other}"))),
        };
        Ok(ProviderReply::text(body))
    }
}

struct DownProvider;

#[async_trait]
impl ReasoningProvider for DownProvider {
    fn name(&self) -> &str {
        "secondary"
    }

    async fn send(
        &self,
        _role: &str,
        _prompt: &ProviderPrompt,
        _timeout: Duration,
    ) -> Result<ProviderReply, ProviderError> {
        Err(ProviderError::Transient("503 service unavailable".into()))
    }
}

struct NewsSource;

#[async_trait]
impl TrendSource for NewsSource {
    fn name(&self) -> &str {
        "news"
    }

    async fn query(&self, _topic: &str, _window: LookbackWindow) -> Result<Vec<RawSignal>, SourceError> {
        let now = Utc::now();
        Ok(vec![
            RawSignal {
                source_name: "google_news".into(),
                text: "Qantas slashes domestic fares".into(),
                timestamp: now - chrono::Duration::hours(2),
                volume_metric: 90.0,
            },
            RawSignal {
                source_name: "google_news".into(),
                text: "Bali flight deals".into(),
                timestamp: now - chrono::Duration::hours(6),
                volume_metric: 40.0,
            },
        ])
    }
}

async fn app() -> Router {
    let mut config = PortalConfig::default();
    config.gateway.timeout_ms = 2_000;
    config.gateway.max_retries = 1;
    config.gateway.backoff_min_ms = 1;
    config.gateway.backoff_max_ms = 5;
    let config = Arc::new(config);

    let providers: Vec<Arc<dyn ReasoningProvider>> =
        vec![Arc::new(CannedProvider) as Arc<dyn ReasoningProvider>, Arc::new(DownProvider)];
    let gateway = Arc::new(ProviderGateway::new(config.clone(), providers).unwrap());
    let db = DBService::new_in_memory().await.unwrap();
    let store = Arc::new(PersistenceStore::new(db, &config.cache));

    routes::router(AppState::new(config, gateway, Arc::new(NewsSource), store))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn wait_until_settled(app: &Router, run_id: &str) -> Value {
    for _ in 0..200 {
        let (status, body) = send(app, get(&format!("/api/runs/{run_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        let state = body["data"]["status"].as_str().unwrap_or_default().to_string();
        if matches!(state.as_str(), "succeeded" | "degraded" | "failed") {
            return body["data"].clone();
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("run {run_id} did not settle");
}

#[tokio::test]
async fn health_reports_providers() {
    let app = app().await;

    let response = app.clone().oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));

    let (_, body) = send(&app, get("/api/health")).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["providers"], json!(["primary", "secondary"]));
}

#[tokio::test]
async fn invalid_brief_is_a_bad_request() {
    let app = app().await;

    let (status, body) = send(&app, post_json("/api/runs", json!({ "goal": "   " }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("goal"));
}

#[tokio::test]
async fn unknown_run_is_not_found() {
    let app = app().await;
    let missing = Uuid::new_v4();

    for uri in [
        format!("/api/runs/{missing}"),
        format!("/api/runs/{missing}/pack"),
        format!("/api/runs/{missing}/history"),
    ] {
        let (status, body) = send(&app, get(&uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(body["success"], false);
    }
    let (status, _) = send(&app, post_json(&format!("/api/runs/{missing}/cancel"), json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn started_run_assembles_a_pack() {
    let app = app().await;

    let (status, body) = send(
        &app,
        post_json(
            "/api/runs",
            json!({ "goal": "Launch a budget airline fare alert", "copyType": "email" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let run_id = body["data"]["runId"].as_str().unwrap().to_string();

    let run = wait_until_settled(&app, &run_id).await;
    assert_eq!(run["status"], "succeeded");
    assert_eq!(run["currentStage"]["state"], "assembled");

    let (status, body) = send(&app, get(&format!("/api/runs/{run_id}/pack"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["kind"], "ready");
    assert_eq!(body["data"]["pack"]["verdicts"][0]["recommendation"], "accept");

    let response = app
        .clone()
        .oneshot(get(&format!("/api/runs/{run_id}/pack/markdown")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/markdown"));
    let markdown = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let markdown = String::from_utf8(markdown.to_vec()).unwrap();
    assert!(markdown.starts_with("# Campaign Pack"));
    assert!(markdown.contains("Set a fare alert and fly for less."));

    let (status, body) = send(&app, get(&format!("/api/runs/{run_id}/history"))).await;
    assert_eq!(status, StatusCode::OK);
    let history = body["data"].as_array().unwrap();
    assert!(history.len() > 2);
    assert_eq!(history[0]["status"], "pending");

    // A settled run cannot be cancelled.
    let (status, body) = send(&app, post_json(&format!("/api/runs/{run_id}/cancel"), json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
}
