//! Average-power energy estimates.
//!
//! Readings are treated as instantaneous power. A window's energy is its mean
//! power held constant for 24 hours a day, scaled by the key's multiplier.

use chrono::{FixedOffset, NaiveDate};
use futures::future::try_join_all;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{AppError, AppResult};
use crate::key_config::KeyConfig;
use crate::services::tsdb::{Sample, TsdbClient};
use crate::time::TimeRange;

const HOURS_PER_DAY: f64 = 24.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AggregationType {
    Daily,
    Standard,
}

impl AggregationType {
    /// Anything other than `daily` is the standard whole-range estimate.
    pub fn from_request(raw: &str) -> Self {
        if raw == "daily" {
            Self::Daily
        } else {
            Self::Standard
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DailyBucket {
    pub sum: f64,
    pub count: u64,
}

impl DailyBucket {
    pub fn average_power(&self) -> f64 {
        self.sum / self.count as f64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DayUsage {
    pub energy: f64,
    pub average_power: f64,
    pub data_points: u64,
}

impl DayUsage {
    fn merge(&mut self, other: &DayUsage) {
        self.energy += other.energy;
        self.average_power += other.average_power;
        self.data_points += other.data_points;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyAggregate {
    pub days: BTreeMap<NaiveDate, DayUsage>,
    /// Unscaled mean of every sample.
    pub global_average: f64,
}

impl DailyAggregate {
    pub fn total_energy(&self) -> f64 {
        self.days.values().map(|day| day.energy).sum()
    }
}

pub fn mean(samples: &[Sample]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let sum: f64 = samples.iter().map(|sample| sample.value).sum();
    Some(sum / samples.len() as f64)
}

pub fn bucket_by_local_day(samples: &[Sample], offset: FixedOffset) -> BTreeMap<NaiveDate, DailyBucket> {
    let mut buckets: BTreeMap<NaiveDate, DailyBucket> = BTreeMap::new();
    for sample in samples {
        let Some(date) = crate::time::local_date(sample.timestamp, offset) else {
            tracing::warn!(timestamp = sample.timestamp, "sample timestamp out of range; skipped");
            continue;
        };
        let bucket = buckets.entry(date).or_default();
        bucket.sum += sample.value;
        bucket.count += 1;
    }
    buckets
}

pub fn aggregate_daily(samples: &[Sample], offset: FixedOffset, multiplier: f64) -> DailyAggregate {
    let days = bucket_by_local_day(samples, offset)
        .into_iter()
        .map(|(date, bucket)| {
            let average_power = bucket.average_power();
            let usage = DayUsage {
                energy: average_power * HOURS_PER_DAY * multiplier,
                average_power,
                data_points: bucket.count,
            };
            (date, usage)
        })
        .collect();
    DailyAggregate {
        days,
        global_average: mean(samples).unwrap_or(0.0),
    }
}

/// One key's share of a range aggregation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyContribution {
    pub data_points: u64,
    pub total_energy: f64,
    pub average_value: f64,
    pub days: BTreeMap<NaiveDate, DayUsage>,
}

pub fn key_contribution(
    samples: &[Sample],
    kind: AggregationType,
    offset: FixedOffset,
    multiplier: f64,
    duration_days: f64,
) -> KeyContribution {
    let Some(average_value) = mean(samples) else {
        return KeyContribution::default();
    };
    let data_points = samples.len() as u64;
    match kind {
        AggregationType::Daily => {
            let daily = aggregate_daily(samples, offset, multiplier);
            KeyContribution {
                data_points,
                total_energy: daily.total_energy(),
                average_value: daily.global_average,
                days: daily.days,
            }
        }
        AggregationType::Standard => KeyContribution {
            data_points,
            total_energy: average_value * HOURS_PER_DAY * duration_days * multiplier,
            average_value,
            days: BTreeMap::new(),
        },
    }
}

/// Sums contributions. Per-day average powers are added, not averaged.
pub fn combine(contributions: impl IntoIterator<Item = KeyContribution>) -> KeyContribution {
    contributions
        .into_iter()
        .fold(KeyContribution::default(), |mut acc, item| {
            acc.data_points += item.data_points;
            acc.total_energy += item.total_energy;
            acc.average_value += item.average_value;
            for (date, usage) in &item.days {
                acc.days.entry(*date).or_default().merge(usage);
            }
            acc
        })
}

#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsageEntry {
    pub date: String,
    pub energy: f64,
    pub average_value: f64,
    pub data_points: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
pub struct TimeRangeInfo {
    pub start: i64,
    pub end: i64,
    pub timezone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AggregationResult {
    pub total_energy: f64,
    pub average_value: f64,
    /// Always 1: each key's multiplier is applied before combining.
    pub multiplier: f64,
    pub unit: String,
    pub duration_in_days: f64,
    pub data_points: u64,
    #[serde(rename = "type")]
    pub kind: AggregationType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_usage: Option<Vec<DailyUsageEntry>>,
    pub time_range: TimeRangeInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyResult {
    pub monthly_usage: f64,
    pub average_value: f64,
    pub multiplier: f64,
    pub unit: String,
    pub days_in_month: f64,
    pub data_points: u64,
    pub time_range: TimeRangeInfo,
}

#[derive(Debug, Clone)]
pub struct RangeQuery {
    pub keys: Vec<String>,
    pub range: TimeRange,
    pub offset: FixedOffset,
    pub kind: AggregationType,
    pub timezone: String,
}

/// Multi-key energy over an arbitrary window.
///
/// Reads run concurrently. Any hard upstream failure aborts the whole query and
/// drops the remaining reads; keys without data contribute nothing.
pub async fn aggregate_range(
    tsdb: &TsdbClient,
    config: &KeyConfig,
    api_url: &str,
    query: &RangeQuery,
) -> AppResult<AggregationResult> {
    let resolver = config.resolver();
    let unit = query
        .keys
        .first()
        .map(|key| resolver.unit(key))
        .unwrap_or_default();
    let duration_days = query.range.duration_days();

    let reads = query
        .keys
        .iter()
        .map(|key| tsdb.read(api_url, key, query.range));
    let series = try_join_all(reads).await?;

    let contributions = query.keys.iter().zip(&series).map(|(key, samples)| {
        if samples.is_empty() {
            tracing::warn!(api_url, key = %key, "no samples for key; contributing zero");
        }
        key_contribution(
            samples,
            query.kind,
            query.offset,
            resolver.multiplier(key),
            duration_days,
        )
    });
    let combined = combine(contributions);

    let daily_usage = (query.kind == AggregationType::Daily).then(|| {
        combined
            .days
            .iter()
            .map(|(date, usage)| DailyUsageEntry {
                date: date.format("%Y-%m-%d").to_string(),
                energy: usage.energy,
                average_value: usage.average_power,
                data_points: usage.data_points,
            })
            .collect()
    });

    Ok(AggregationResult {
        total_energy: combined.total_energy,
        average_value: combined.average_value,
        multiplier: 1.0,
        unit,
        duration_in_days: duration_days,
        data_points: combined.data_points,
        kind: query.kind,
        daily_usage,
        time_range: TimeRangeInfo {
            start: query.range.start,
            end: query.range.end,
            timezone: query.timezone.clone(),
        },
    })
}

/// Single-key energy over one local calendar month. Empty data is `NotFound`.
pub async fn aggregate_month(
    tsdb: &TsdbClient,
    config: &KeyConfig,
    api_url: &str,
    key: &str,
    range: TimeRange,
    timezone: &str,
) -> AppResult<MonthlyResult> {
    let resolver = config.resolver();
    let multiplier = resolver.multiplier(key);
    let unit = resolver.unit(key);
    let days_in_month = range.duration_days();

    let samples = tsdb.read(api_url, key, range).await?;
    let Some(average_value) = mean(&samples) else {
        return Err(AppError::not_found("No data returned from TSDB"));
    };

    Ok(MonthlyResult {
        monthly_usage: average_value * HOURS_PER_DAY * days_in_month * multiplier,
        average_value,
        multiplier,
        unit,
        days_in_month,
        data_points: samples.len() as u64,
        time_range: TimeRangeInfo {
            start: range.start,
            end: range.end,
            timezone: timezone.to_string(),
        },
    })
}
