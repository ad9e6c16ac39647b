use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use super::{preflight, resolve_api_url, ApiUrlQuery};
use crate::error::{ApiEnvelope, AppError, AppResult};
use crate::services::energy::{
    self, AggregationResult, AggregationType, MonthlyResult, RangeQuery,
};
use crate::state::AppState;
use crate::time::{self, TimeRange};

/// One key or several; blank entries are ignored.
#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
#[serde(untagged)]
pub enum KeySelection {
    One(String),
    Many(Vec<String>),
}

impl KeySelection {
    fn into_keys(self) -> Vec<String> {
        let keys = match self {
            Self::One(key) => vec![key],
            Self::Many(keys) => keys,
        };
        keys.into_iter()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, utoipa::ToSchema)]
pub struct CalendarDay {
    pub year: Option<i32>,
    pub month: Option<i32>,
    pub day: Option<i32>,
}

impl CalendarDay {
    fn parts(self) -> Option<(i32, i32, i32)> {
        Some((self.year?, self.month?, self.day?))
    }
}

#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RangeAggregationRequest {
    pub key: Option<KeySelection>,
    pub from: Option<CalendarDay>,
    pub to: Option<CalendarDay>,
    /// `daily` or `standard`.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Offset from UTC such as `+8` or `-0500`.
    pub timezone: Option<String>,
    pub api_url: Option<String>,
}

#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyAggregationRequest {
    pub key: Option<String>,
    pub year: Option<i32>,
    pub month: Option<i32>,
    pub timezone: Option<String>,
    pub api_url: Option<String>,
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn range_query(request: RangeAggregationRequest) -> AppResult<RangeQuery> {
    let keys = request.key.map(KeySelection::into_keys).unwrap_or_default();
    let from = request.from.and_then(CalendarDay::parts);
    let to = request.to.and_then(CalendarDay::parts);
    let kind = present(request.kind);
    let timezone = present(request.timezone);

    let (Some(from), Some(to), Some(kind), Some(timezone)) = (from, to, kind, timezone) else {
        return Err(AppError::missing_parameter(
            "Missing required parameters: key, from, to, type, timezone",
        ));
    };
    if keys.is_empty() {
        return Err(AppError::missing_parameter(
            "Missing required parameters: key, from, to, type, timezone",
        ));
    }

    let offset = time::parse_timezone_offset(&timezone)?;
    let start = time::local_midnight(from.0, from.1, from.2, offset)?;
    let end = time::local_midnight(to.0, to.1, to.2, offset)?;
    let range = TimeRange::new(start, end)?;

    Ok(RangeQuery {
        keys,
        range,
        offset,
        kind: AggregationType::from_request(&kind),
        timezone,
    })
}

#[utoipa::path(
    post,
    path = "/api/average-power-hour-product",
    tag = "energy",
    request_body = RangeAggregationRequest,
    params(("apiUrl" = Option<String>, Query, description = "Upstream TSDB URL; also accepted in the body or the x-api-url header")),
    responses(
        (status = 200, description = "Energy estimate wrapped as {success, data}", body = AggregationResult),
        (status = 400, description = "Missing or invalid parameters", body = crate::error::ErrorEnvelope),
        (status = 500, description = "Upstream TSDB or configuration store failure", body = crate::error::ErrorEnvelope)
    )
)]
pub(crate) async fn average_power_hour_product(
    State(state): State<AppState>,
    query: Result<Query<ApiUrlQuery>, QueryRejection>,
    headers: HeaderMap,
    payload: Result<Json<RangeAggregationRequest>, JsonRejection>,
) -> AppResult<Json<ApiEnvelope<AggregationResult>>> {
    let Json(mut request) = payload?;
    let query = ApiUrlQuery::from_extracted(query);
    let api_url = resolve_api_url(request.api_url.take().as_deref(), &query, &headers)?;
    let range_query = range_query(request)?;

    let key_config = state.key_configs.get_config(&api_url).await?;
    let result = energy::aggregate_range(&state.tsdb, &key_config, &api_url, &range_query).await?;
    tracing::debug!(
        api_url,
        keys = range_query.keys.len(),
        data_points = result.data_points,
        "computed range energy"
    );
    Ok(Json(ApiEnvelope::ok(result)))
}

#[utoipa::path(
    post,
    path = "/api/monthly-average-power-hour-product",
    tag = "energy",
    request_body = MonthlyAggregationRequest,
    params(("apiUrl" = Option<String>, Query, description = "Upstream TSDB URL; also accepted in the body or the x-api-url header")),
    responses(
        (status = 200, description = "Monthly estimate wrapped as {success, data}", body = MonthlyResult),
        (status = 400, description = "Missing or invalid parameters", body = crate::error::ErrorEnvelope),
        (status = 404, description = "No samples for the key in that month", body = crate::error::ErrorEnvelope),
        (status = 500, description = "Upstream TSDB or configuration store failure", body = crate::error::ErrorEnvelope)
    )
)]
pub(crate) async fn monthly_average_power_hour_product(
    State(state): State<AppState>,
    query: Result<Query<ApiUrlQuery>, QueryRejection>,
    headers: HeaderMap,
    payload: Result<Json<MonthlyAggregationRequest>, JsonRejection>,
) -> AppResult<Json<ApiEnvelope<MonthlyResult>>> {
    let Json(request) = payload?;
    let query = ApiUrlQuery::from_extracted(query);
    let api_url = resolve_api_url(request.api_url.as_deref(), &query, &headers)?;

    let (Some(key), Some(year), Some(month), Some(timezone)) = (
        present(request.key),
        request.year,
        request.month,
        present(request.timezone),
    ) else {
        return Err(AppError::missing_parameter(
            "Missing required parameters: key, year, month, timezone",
        ));
    };
    let offset = time::parse_timezone_offset(&timezone)?;
    let month = u32::try_from(month)
        .map_err(|_| AppError::invalid_range("Invalid month: expected 1 to 12"))?;
    let range = time::month_window(year, month, offset)?;

    let key_config = state.key_configs.get_config(&api_url).await?;
    let result = energy::aggregate_month(&state.tsdb, &key_config, &api_url, &key, range, &timezone).await?;
    Ok(Json(ApiEnvelope::ok(result)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/average-power-hour-product",
            post(average_power_hour_product).options(preflight),
        )
        .route(
            "/monthly-average-power-hour-product",
            post(monthly_average_power_hour_product).options(preflight),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::services::config_store::{ConfigStore, MemoryConfigStore};
    use crate::services::tsdb::Sample;
    use crate::test_support::{
        post_json, send, spawn_fake_tsdb, test_state, test_state_with_store, FakeSeries, FakeTsdb,
    };
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use std::sync::Arc;

    const DAY: i64 = 86_400;
    // 2024-01-01T00:00:00Z
    const JAN_1: i64 = 1_704_067_200;

    fn app(state: AppState) -> Router {
        crate::routes::router(state)
    }

    fn samples(points: &[(i64, f64)]) -> FakeSeries {
        FakeSeries::Samples(
            points
                .iter()
                .map(|&(timestamp, value)| Sample { timestamp, value })
                .collect(),
        )
    }

    #[test]
    fn incomplete_dates_are_missing_parameters() {
        let request: RangeAggregationRequest = serde_json::from_value(json!({
            "key": "power",
            "from": {"year": 2024, "month": 1},
            "to": {"year": 2024, "month": 1, "day": 2},
            "type": "standard",
            "timezone": "+0"
        }))
        .unwrap();
        let err = range_query(request).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingParameter);
    }

    #[test]
    fn key_lists_drop_blank_entries() {
        let request: RangeAggregationRequest = serde_json::from_value(json!({
            "key": ["a", " ", "b"],
            "from": {"year": 2024, "month": 1, "day": 1},
            "to": {"year": 2024, "month": 1, "day": 2},
            "type": "daily",
            "timezone": "+8"
        }))
        .unwrap();
        let query = range_query(request).unwrap();
        assert_eq!(query.keys, vec!["a", "b"]);
        assert_eq!(query.kind, AggregationType::Daily);
        assert_eq!(query.range.start, JAN_1 - 8 * 3600);
        assert_eq!(query.range.duration_seconds(), DAY);
    }

    #[tokio::test]
    async fn range_rejects_missing_api_url_before_other_checks() {
        let resp = send(
            app(test_state()),
            post_json("/api/average-power-hour-product", &json!({"key": "power"})),
        )
        .await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            resp.body,
            json!({"success": false, "message": "Missing required parameter: apiUrl"})
        );
    }

    #[tokio::test]
    async fn range_rejects_bad_timezone_and_empty_window() {
        let base = json!({
            "apiUrl": "http://127.0.0.1:9/",
            "key": "power",
            "from": {"year": 2024, "month": 1, "day": 2},
            "to": {"year": 2024, "month": 1, "day": 2},
            "type": "standard",
        });

        let mut bad_tz = base.clone();
        bad_tz["timezone"] = json!("UTC+8");
        let resp = send(app(test_state()), post_json("/api/average-power-hour-product", &bad_tz)).await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        assert!(resp.body["message"].as_str().unwrap().starts_with("Invalid timezone"));

        let mut empty = base;
        empty["timezone"] = json!("+0");
        let resp = send(app(test_state()), post_json("/api/average-power-hour-product", &empty)).await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            resp.body["message"],
            "Invalid date range: end date must be after start date"
        );
    }

    #[tokio::test]
    async fn range_rejects_empty_key_list() {
        let body = json!({
            "apiUrl": "http://127.0.0.1:9/",
            "key": [],
            "from": {"year": 2024, "month": 1, "day": 1},
            "to": {"year": 2024, "month": 1, "day": 2},
            "type": "standard",
            "timezone": "+0",
        });
        let resp = send(app(test_state()), post_json("/api/average-power-hour-product", &body)).await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            resp.body["message"],
            "Missing required parameters: key, from, to, type, timezone"
        );
    }

    #[tokio::test]
    async fn malformed_body_keeps_error_envelope() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/average-power-hour-product")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let resp = send(app(test_state()), request).await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        assert_eq!(resp.body["success"], json!(false));
    }

    #[tokio::test]
    async fn daily_range_combines_keys_from_header_api_url() {
        let fake = FakeTsdb::new();
        fake.insert("solar", samples(&[(JAN_1 + 3600, 10.0), (JAN_1 + DAY + 3600, 20.0)]));
        fake.insert("wind", samples(&[(JAN_1 + 7200, 5.0)]));
        let url = spawn_fake_tsdb(fake.clone()).await;

        let store = Arc::new(MemoryConfigStore::new());
        store
            .set(
                &url,
                json!({"multipliers": {"solar": 0.001}, "units": {"solar": "kWh", "wind": "Wh"}}).to_string(),
            )
            .await
            .unwrap();

        let request = Request::builder()
            .method("POST")
            .uri("/api/average-power-hour-product")
            .header("content-type", "application/json")
            .header("x-api-url", url.as_str())
            .body(Body::from(
                json!({
                    "key": ["solar", "wind"],
                    "from": {"year": 2024, "month": 1, "day": 1},
                    "to": {"year": 2024, "month": 1, "day": 3},
                    "type": "daily",
                    "timezone": "+0"
                })
                .to_string(),
            ))
            .unwrap();
        let resp = send(app(test_state_with_store(store)), request).await;
        assert_eq!(resp.status, StatusCode::OK, "{}", resp.body);

        let data = &resp.body["data"];
        assert_eq!(resp.body["success"], json!(true));
        assert_eq!(data["type"], "daily");
        assert_eq!(data["unit"], "kWh");
        assert_eq!(data["multiplier"], json!(1.0));
        assert_eq!(data["dataPoints"], json!(3));
        assert_eq!(data["durationInDays"], json!(2.0));
        assert_eq!(data["timeRange"], json!({"start": JAN_1, "end": JAN_1 + 2 * DAY, "timezone": "+0"}));

        let daily = data["dailyUsage"].as_array().unwrap();
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0]["date"], "2024-01-01");
        assert_eq!(daily[0]["dataPoints"], json!(2));
        let day_one = daily[0]["energy"].as_f64().unwrap();
        assert!((day_one - (10.0 * 24.0 * 0.001 + 5.0 * 24.0)).abs() < 1e-9);
        assert_eq!(daily[1]["date"], "2024-01-02");

        let total = data["totalEnergy"].as_f64().unwrap();
        let sum: f64 = daily.iter().map(|d| d["energy"].as_f64().unwrap()).sum();
        assert!((total - sum).abs() < 1e-9);
        assert_eq!(fake.requests().len(), 2);
    }

    #[tokio::test]
    async fn standard_range_omits_daily_usage() {
        let fake = FakeTsdb::new();
        fake.insert("power", samples(&[(JAN_1, 2.0), (JAN_1 + 60, 4.0)]));
        let url = spawn_fake_tsdb(fake).await;

        let resp = send(
            app(test_state()),
            post_json(
                "/api/average-power-hour-product",
                &json!({
                    "apiUrl": url,
                    "key": "power",
                    "from": {"year": 2024, "month": 1, "day": 1},
                    "to": {"year": 2024, "month": 1, "day": 2},
                    "type": "hourly",
                    "timezone": "+0"
                }),
            ),
        )
        .await;
        assert_eq!(resp.status, StatusCode::OK, "{}", resp.body);
        let data = &resp.body["data"];
        assert_eq!(data["type"], "standard");
        assert!(data.get("dailyUsage").is_none());
        assert_eq!(data["averageValue"], json!(3.0));
        assert_eq!(data["totalEnergy"], json!(72.0));
    }

    #[tokio::test]
    async fn upstream_failure_fails_the_whole_request() {
        let fake = FakeTsdb::new();
        fake.insert("ok", samples(&[(JAN_1, 1.0)]));
        fake.insert("broken", FakeSeries::Status(500));
        let url = spawn_fake_tsdb(fake).await;

        let resp = send(
            app(test_state()),
            post_json(
                &format!("/api/average-power-hour-product?apiUrl={url}"),
                &json!({
                    "key": ["ok", "broken"],
                    "from": {"year": 2024, "month": 1, "day": 1},
                    "to": {"year": 2024, "month": 1, "day": 2},
                    "type": "standard",
                    "timezone": "+0"
                }),
            ),
        )
        .await;
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.body["success"], json!(false));
        assert!(resp.body["debug"].as_str().unwrap().contains("broken"));
    }

    #[tokio::test]
    async fn monthly_reports_not_found_without_samples() {
        let url = spawn_fake_tsdb(FakeTsdb::new()).await;
        let resp = send(
            app(test_state()),
            post_json(
                "/api/monthly-average-power-hour-product",
                &json!({"apiUrl": url, "key": "power", "year": 2024, "month": 2, "timezone": "+0"}),
            ),
        )
        .await;
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
        assert_eq!(
            resp.body,
            json!({"success": false, "message": "No data returned from TSDB"})
        );
    }

    #[tokio::test]
    async fn monthly_december_rolls_into_next_year() {
        let fake = FakeTsdb::new();
        // 2024-12-10T00:00:00Z
        fake.insert("power", samples(&[(1_733_788_800, 2.0)]));
        let url = spawn_fake_tsdb(fake.clone()).await;

        let resp = send(
            app(test_state()),
            post_json(
                "/api/monthly-average-power-hour-product",
                &json!({"apiUrl": url, "key": "power", "year": 2024, "month": 12, "timezone": "+0"}),
            ),
        )
        .await;
        assert_eq!(resp.status, StatusCode::OK, "{}", resp.body);
        let data = &resp.body["data"];
        assert_eq!(data["daysInMonth"], json!(31.0));
        assert_eq!(data["monthlyUsage"], json!(2.0 * 24.0 * 31.0));
        // 2025-01-01T00:00:00Z
        assert_eq!(data["timeRange"]["end"], json!(1_735_689_600));

        let read = &fake.requests()[0];
        assert_eq!(read["Read"]["start_timestamp"], json!(1_733_011_200));
    }

    #[tokio::test]
    async fn monthly_validates_parameters() {
        let resp = send(
            app(test_state()),
            post_json(
                "/api/monthly-average-power-hour-product",
                &json!({"apiUrl": "http://127.0.0.1:9/", "key": "power", "month": 2, "timezone": "+0"}),
            ),
        )
        .await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            resp.body["message"],
            "Missing required parameters: key, year, month, timezone"
        );

        let resp = send(
            app(test_state()),
            post_json(
                "/api/monthly-average-power-hour-product",
                &json!({"apiUrl": "http://127.0.0.1:9/", "key": "power", "year": 2024, "month": 13, "timezone": "+0"}),
            ),
        )
        .await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    }
}
