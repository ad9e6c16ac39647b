use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "TSDB Console Server",
        description = "Energy aggregation, key configuration and TSDB proxy API"
    ),
    paths(
        crate::routes::health::healthz,
        crate::routes::energy::average_power_hour_product,
        crate::routes::energy::monthly_average_power_hour_product,
        crate::routes::tsdb::tsdb_proxy,
        crate::routes::key_config::resolve_keys,
    ),
    components(schemas(
        crate::error::ErrorEnvelope,
        crate::routes::health::HealthResponse,
        crate::routes::energy::KeySelection,
        crate::routes::energy::CalendarDay,
        crate::routes::energy::RangeAggregationRequest,
        crate::routes::energy::MonthlyAggregationRequest,
        crate::routes::tsdb::TsdbOperation,
        crate::routes::key_config::ResolveKeysRequest,
        crate::services::energy::AggregationType,
        crate::services::energy::AggregationResult,
        crate::services::energy::DailyUsageEntry,
        crate::services::energy::MonthlyResult,
        crate::services::energy::TimeRangeInfo,
        crate::services::tsdb::Sample,
        crate::key_config::KeyConfig,
        crate::key_config::KeyMetadata,
    )),
    tags(
        (name = "energy", description = "Average-power energy estimates"),
        (name = "tsdb", description = "Pass-through TSDB operations and key configuration storage"),
        (name = "key-config", description = "Per-key display metadata"),
        (name = "health", description = "Liveness")
    )
)]
pub struct ApiDoc;

pub fn openapi_json() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

async fn openapi_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi_json())
}

pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_handler))
}
