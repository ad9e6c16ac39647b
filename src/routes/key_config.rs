use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use super::{preflight, resolve_api_url, ApiUrlQuery};
use crate::error::{ApiEnvelope, AppError, AppResult};
use crate::key_config::KeyMetadata;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolveKeysRequest {
    pub api_url: Option<String>,
    pub keys: Option<Vec<String>>,
}

#[utoipa::path(
    post,
    path = "/api/key-config/resolve",
    tag = "key-config",
    request_body = ResolveKeysRequest,
    params(("apiUrl" = Option<String>, Query, description = "Configuration key; also accepted in the body or the x-api-url header")),
    responses(
        (status = 200, description = "Resolved display metadata per key, in request order", body = [KeyMetadata]),
        (status = 400, description = "Missing keys or apiUrl", body = crate::error::ErrorEnvelope),
        (status = 500, description = "Configuration store failure", body = crate::error::ErrorEnvelope)
    )
)]
pub(crate) async fn resolve_keys(
    State(state): State<AppState>,
    query: Result<Query<ApiUrlQuery>, QueryRejection>,
    headers: HeaderMap,
    payload: Result<Json<ResolveKeysRequest>, JsonRejection>,
) -> AppResult<Json<ApiEnvelope<Vec<KeyMetadata>>>> {
    let Json(request) = payload?;
    let query = ApiUrlQuery::from_extracted(query);
    let api_url = resolve_api_url(request.api_url.as_deref(), &query, &headers)?;
    let keys = request
        .keys
        .ok_or_else(|| AppError::missing_parameter("Missing required parameter: keys"))?;

    let config = state.key_configs.get_config(&api_url).await?;
    let resolver = config.resolver();
    let resolved = keys.iter().map(|key| resolver.metadata(key)).collect();
    Ok(Json(ApiEnvelope::ok(resolved)))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/key-config/resolve", post(resolve_keys).options(preflight))
}
