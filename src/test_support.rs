use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::ServerConfig;
use crate::services::config_store::{ConfigGateway, MemoryConfigStore};
use crate::services::tsdb::{Sample, TsdbClient};
use crate::state::AppState;

pub fn test_config() -> ServerConfig {
    ServerConfig {
        redis_url: None,
        default_api_url: "http://127.0.0.1:9".to_string(),
        upstream_timeout: Duration::from_secs(5),
        config_store_timeout: Duration::from_secs(1),
        rate_limit_per_second: 20,
        rate_limit_burst: 60,
        static_root: None,
    }
}

pub fn test_state() -> AppState {
    test_state_with_store(Arc::new(MemoryConfigStore::new()))
}

pub fn test_state_with_store(store: Arc<MemoryConfigStore>) -> AppState {
    let config = test_config();
    let tsdb = TsdbClient::new(reqwest::Client::new(), config.upstream_timeout);
    let key_configs = ConfigGateway::new(store, config.config_store_timeout);
    AppState {
        config,
        tsdb,
        key_configs,
    }
}

#[derive(Debug, Clone)]
pub enum FakeSeries {
    Samples(Vec<Sample>),
    /// `{"success": false}` with a 200 status.
    Failure,
    Status(u16),
    /// Answers with no data after the given delay.
    Stall(Duration),
}

/// In-process stand-in for the upstream TSDB HTTP API.
#[derive(Clone, Default)]
pub struct FakeTsdb {
    series: Arc<Mutex<HashMap<String, FakeSeries>>>,
    requests: Arc<Mutex<Vec<JsonValue>>>,
}

impl FakeTsdb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, series: FakeSeries) {
        self.series
            .lock()
            .expect("series lock")
            .insert(key.to_string(), series);
    }

    pub fn requests(&self) -> Vec<JsonValue> {
        self.requests.lock().expect("requests lock").clone()
    }
}

async fn fake_handler(State(fake): State<FakeTsdb>, Json(body): Json<JsonValue>) -> Response {
    fake.requests.lock().expect("requests lock").push(body.clone());
    match body.get("operation").and_then(JsonValue::as_str) {
        Some("read") => {
            let key = body.get("key").and_then(JsonValue::as_str).unwrap_or_default();
            let series = fake.series.lock().expect("series lock").get(key).cloned();
            match series {
                Some(FakeSeries::Samples(samples)) => {
                    Json(json!({"success": true, "data": samples})).into_response()
                }
                Some(FakeSeries::Failure) => {
                    Json(json!({"success": false, "message": "key not found"})).into_response()
                }
                Some(FakeSeries::Status(code)) => (
                    StatusCode::from_u16(code).expect("status code"),
                    "upstream failure",
                )
                    .into_response(),
                Some(FakeSeries::Stall(delay)) => {
                    tokio::time::sleep(delay).await;
                    Json(json!({"success": true, "data": []})).into_response()
                }
                None => Json(json!({"success": true, "data": []})).into_response(),
            }
        }
        Some("ids") => Json(json!({"success": true, "data": ["power", "energy"]})).into_response(),
        Some("subscribe") => "tick".into_response(),
        Some("serverInfo") => (StatusCode::BAD_GATEWAY, "down").into_response(),
        _ => Json(json!({"success": true, "echo": body})).into_response(),
    }
}

/// Serves `fake` on an ephemeral loopback port and returns its base URL.
pub async fn spawn_fake_tsdb(fake: FakeTsdb) -> String {
    let app = Router::new()
        .route("/", post(fake_handler))
        .with_state(fake);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake tsdb");
    let addr = listener.local_addr().expect("fake tsdb addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{addr}/")
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: JsonValue,
}

/// Sends one request through `app` and decodes the JSON body (`Null` when empty or not JSON).
pub async fn send(app: Router, request: axum::http::Request<axum::body::Body>) -> TestResponse {
    use tower::ServiceExt;

    let resp = app.oneshot(request).await.expect("router response");
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("response body");
    let body = serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null);
    TestResponse {
        status,
        headers,
        body,
    }
}

pub fn post_json(uri: &str, body: &JsonValue) -> axum::http::Request<axum::body::Body> {
    axum::http::Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .expect("request")
}
