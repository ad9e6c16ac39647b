use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::time::TimeRange;

/// One reading from the upstream store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Sample {
    pub timestamp: i64,
    pub value: f64,
}

#[derive(Debug, Serialize)]
struct ReadRequest<'a> {
    operation: &'static str,
    key: &'a str,
    #[serde(rename = "Read")]
    read: ReadWindow,
}

#[derive(Debug, Serialize)]
struct ReadWindow {
    start_timestamp: i64,
    end_timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct ReadEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct RawSample {
    timestamp: serde_json::Number,
    value: f64,
}

#[derive(Clone)]
pub struct TsdbClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl TsdbClient {
    pub fn new(http: reqwest::Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    /// Reads `key` over `range`.
    ///
    /// Transport failures and non-2xx statuses are errors. A body that reports
    /// `success: false`, carries no `data` array, or cannot be parsed yields no
    /// samples.
    pub async fn read(&self, api_url: &str, key: &str, range: TimeRange) -> AppResult<Vec<Sample>> {
        let payload = ReadRequest {
            operation: "read",
            key,
            read: ReadWindow {
                start_timestamp: range.start,
                end_timestamp: range.end,
            },
        };
        let resp = self
            .http
            .post(api_url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|err| self.transport_error(key, &err))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::upstream(format!(
                "TSDB API error for key {key}: {status}"
            )));
        }
        let body = resp
            .bytes()
            .await
            .map_err(|err| self.transport_error(key, &err))?;
        Ok(samples_from_body(key, &body))
    }

    /// Forwards an arbitrary operation body and returns the upstream JSON.
    pub async fn forward(&self, api_url: &str, body: &JsonValue) -> AppResult<JsonValue> {
        let resp = self
            .http
            .post(api_url)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|err| self.transport_error("-", &err))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::upstream(format!(
                "HTTP error! status: {}",
                status.as_u16()
            )));
        }
        resp.json::<JsonValue>()
            .await
            .map_err(|err| AppError::upstream(format!("TSDB returned an invalid body: {err}")))
    }

    /// Opens a subscription and yields each upstream chunk framed as an SSE event.
    ///
    /// Only the response head is bounded by the timeout; the stream itself is
    /// long-lived.
    pub async fn subscribe(
        &self,
        api_url: &str,
        body: &JsonValue,
    ) -> AppResult<BoxStream<'static, Result<String, reqwest::Error>>> {
        let request = self.http.post(api_url).json(body).send();
        let resp = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| {
                AppError::upstream(format!(
                    "TSDB subscribe timed out after {}ms",
                    self.timeout.as_millis()
                ))
            })?
            .map_err(|err| self.transport_error("-", &err))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::upstream(format!(
                "HTTP error! status: {}",
                status.as_u16()
            )));
        }
        Ok(resp
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| sse_frame(&bytes)))
            .boxed())
    }

    fn transport_error(&self, key: &str, err: &reqwest::Error) -> AppError {
        if err.is_timeout() {
            AppError::upstream(format!(
                "TSDB request for key {key} timed out after {}ms",
                self.timeout.as_millis()
            ))
        } else {
            AppError::upstream(format!("TSDB request for key {key} failed: {err}"))
        }
    }
}

pub(crate) fn sse_frame(chunk: &[u8]) -> String {
    format!("data: {}\n\n", String::from_utf8_lossy(chunk))
}

pub(crate) fn samples_from_body(key: &str, body: &[u8]) -> Vec<Sample> {
    let envelope: ReadEnvelope = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::warn!(key, error = %err, "unparseable TSDB read response; treating as no data");
            return Vec::new();
        }
    };
    if !envelope.success {
        tracing::warn!(key, "TSDB read reported failure; treating as no data");
        return Vec::new();
    }
    let Some(JsonValue::Array(entries)) = envelope.data else {
        tracing::debug!(key, "TSDB read returned no data array");
        return Vec::new();
    };

    let total = entries.len();
    let samples: Vec<Sample> = entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<RawSample>(entry).ok())
        .filter_map(|raw| {
            let timestamp = raw
                .timestamp
                .as_i64()
                .or_else(|| raw.timestamp.as_f64().map(|ts| ts.floor() as i64))?;
            raw.value.is_finite().then_some(Sample {
                timestamp,
                value: raw.value,
            })
        })
        .collect();
    if samples.len() != total {
        tracing::warn!(
            key,
            dropped = total - samples.len(),
            "skipped malformed samples in TSDB read response"
        );
    }
    samples
}
