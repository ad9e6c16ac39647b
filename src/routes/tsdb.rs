use axum::body::{Body, Bytes};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use super::{header_api_url, preflight, resolve_api_url, validate_api_url, ApiUrlQuery};
use crate::error::{ApiEnvelope, AppError, AppResult};
use crate::state::AppState;

/// Operations relayed to the upstream TSDB unchanged.
const FORWARDED_OPERATIONS: &[&str] = &[
    "ids",
    "idswithcount",
    "read",
    "write",
    "unsubscribe",
    "initkey",
    "deletekey",
    "renamekey",
    "multi-read",
    "serverInfo",
];

#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TsdbOperation {
    pub operation: Option<String>,
    /// Configuration key for `getapiurlconfig` / `setapiurlconfig`.
    pub api_url: Option<String>,
    /// Payload of `setapiurlconfig`.
    #[schema(value_type = Option<Object>)]
    pub config: Option<JsonValue>,
}

/// Accepts a JSON object, or a JSON string that itself holds one.
fn parse_operation_body(raw: &[u8]) -> AppResult<JsonValue> {
    let value: JsonValue = serde_json::from_slice(raw)
        .map_err(|err| AppError::missing_parameter(format!("Invalid request body: {err}")))?;
    let value = match value {
        JsonValue::String(inner) => serde_json::from_str(&inner)
            .map_err(|err| AppError::missing_parameter(format!("Invalid request body: {err}")))?,
        other => other,
    };
    if !value.is_object() {
        return Err(AppError::missing_parameter(
            "Invalid request body: expected a JSON object",
        ));
    }
    Ok(value)
}

fn forward_target(state: &AppState, query: &ApiUrlQuery, headers: &HeaderMap) -> AppResult<String> {
    let target = header_api_url(headers)
        .or_else(|| {
            query
                .api_url
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| state.config.default_api_url.clone());
    validate_api_url(&target)?;
    Ok(target)
}

#[utoipa::path(
    post,
    path = "/api/tsdb",
    tag = "tsdb",
    request_body = TsdbOperation,
    params(("apiUrl" = Option<String>, Query, description = "Upstream TSDB URL when no x-api-url header is sent")),
    responses(
        (status = 200, description = "Upstream JSON wrapped as {success, data}; text/event-stream for subscribe"),
        (status = 400, description = "Unknown operation or malformed body", body = crate::error::ErrorEnvelope),
        (status = 500, description = "Upstream TSDB or configuration store failure", body = crate::error::ErrorEnvelope)
    )
)]
pub(crate) async fn tsdb_proxy(
    State(state): State<AppState>,
    query: Result<Query<ApiUrlQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let query = ApiUrlQuery::from_extracted(query);
    let body = parse_operation_body(&body)?;
    let request = TsdbOperation::deserialize(&body).unwrap_or_default();
    let operation = request.operation.as_deref().unwrap_or_default();

    match operation {
        "getapiurlconfig" => {
            let api_url = resolve_api_url(request.api_url.as_deref(), &query, &headers)?;
            let config = state.key_configs.get_config(&api_url).await?;
            Ok(Json(ApiEnvelope::ok(config)).into_response())
        }
        "setapiurlconfig" => {
            let api_url = resolve_api_url(request.api_url.as_deref(), &query, &headers)?;
            let Some(config) = request.config.as_ref() else {
                return Err(AppError::missing_parameter("Missing required parameter: config"));
            };
            let stored = state.key_configs.set_config(&api_url, config).await?;
            Ok(Json(ApiEnvelope::ok(stored)).into_response())
        }
        "subscribe" => {
            let target = forward_target(&state, &query, &headers)?;
            let events = state.tsdb.subscribe(&target, &body).await?;
            tracing::info!(api_url = %target, "opened TSDB subscription stream");
            Response::builder()
                .header(CONTENT_TYPE, "text/event-stream")
                .header(CACHE_CONTROL, "no-cache")
                .body(Body::from_stream(events))
                .map_err(AppError::unexpected)
        }
        op if FORWARDED_OPERATIONS.contains(&op) => {
            let target = forward_target(&state, &query, &headers)?;
            let data = state.tsdb.forward(&target, &body).await?;
            Ok(Json(ApiEnvelope::ok(data)).into_response())
        }
        _ => Err(AppError::invalid_operation()),
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/tsdb", post(tsdb_proxy).options(preflight))
}
