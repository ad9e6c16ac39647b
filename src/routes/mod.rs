pub mod energy;
pub mod health;
pub mod key_config;
pub mod tsdb;

use anyhow::Context;
use axum::extract::rejection::QueryRejection;
use axum::extract::Query;
use axum::http::{header, HeaderMap, HeaderValue, Method};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use url::Url;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub const API_URL_HEADER: &str = "x-api-url";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiUrlQuery {
    #[serde(rename = "apiUrl")]
    pub api_url: Option<String>,
}

impl ApiUrlQuery {
    /// A malformed query string is treated as carrying no `apiUrl`.
    pub(crate) fn from_extracted(query: Result<Query<ApiUrlQuery>, QueryRejection>) -> Self {
        query.map(|Query(query)| query).unwrap_or_default()
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub(crate) fn header_api_url(headers: &HeaderMap) -> Option<String> {
    non_empty(
        headers
            .get(API_URL_HEADER)
            .and_then(|value| value.to_str().ok()),
    )
}

/// Picks the upstream URL from the body, then `?apiUrl=`, then the `x-api-url` header.
pub(crate) fn resolve_api_url(
    body: Option<&str>,
    query: &ApiUrlQuery,
    headers: &HeaderMap,
) -> AppResult<String> {
    let api_url = non_empty(body)
        .or_else(|| non_empty(query.api_url.as_deref()))
        .or_else(|| header_api_url(headers))
        .ok_or_else(|| AppError::missing_parameter("Missing required parameter: apiUrl"))?;
    validate_api_url(&api_url)?;
    Ok(api_url)
}

pub(crate) fn validate_api_url(raw: &str) -> AppResult<()> {
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(AppError::missing_parameter(format!(
            "Invalid apiUrl: {raw}"
        ))),
    }
}

pub(crate) async fn preflight() -> Json<JsonValue> {
    Json(json!({}))
}

fn api_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .nest(
            "/api",
            Router::new()
                .merge(energy::router())
                .merge(tsdb::router())
                .merge(key_config::router())
                .merge(crate::openapi::router()),
        )
        .with_state(state)
}

/// Outermost layers, so rejections from inner middleware carry them too.
fn with_cors(router: Router) -> Router {
    router
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, OPTIONS"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type, x-api-url"),
        ))
}

pub fn router(state: AppState) -> Router {
    with_cors(api_router(state))
}

/// The served application: routes behind the POST rate limiter, then `fallback`
/// for unmatched paths, all under the CORS headers.
pub fn app(state: AppState, fallback: Router) -> anyhow::Result<Router> {
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(state.config.rate_limit_per_second)
            .burst_size(state.config.rate_limit_burst)
            .methods(vec![Method::POST])
            .use_headers()
            .finish()
            .context("failed to build rate limiter config")?,
    );

    let governor_limiter = governor_conf.limiter().clone();
    std::thread::spawn(move || loop {
        std::thread::sleep(std::time::Duration::from_secs(60));
        governor_limiter.retain_recent();
    });

    let routed = api_router(state)
        .layer(GovernorLayer::new(governor_conf))
        .fallback_service(fallback);
    Ok(with_cors(routed))
}
