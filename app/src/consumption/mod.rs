use anyhow::{Context as _, bail};
use serde::{Deserialize, Serialize};

use crate::core::{time::DateTime, unit::KiloWattHours};

/// Half-hourly reading as delivered by the API, not yet validated.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReading {
    pub start_at: Option<String>,
    pub end_at: Option<String>,
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub start_at: DateTime,
    pub end_at: DateTime,
    pub value: KiloWattHours,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatestReading {
    pub value: KiloWattHours,
    pub start_at: DateTime,
    pub end_at: DateTime,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ConsumptionSummary {
    pub latest: Option<LatestReading>,
    pub today_total: KiloWattHours,
    pub yesterday_total: KiloWattHours,
}

impl TryFrom<&RawReading> for Reading {
    type Error = anyhow::Error;

    fn try_from(raw: &RawReading) -> Result<Self, Self::Error> {
        let start_at = raw.start_at.as_deref().context("Missing startAt")?;
        let end_at = raw.end_at.as_deref().context("Missing endAt")?;
        let value = raw.value.as_ref().context("Missing value")?;

        let value = match value {
            serde_json::Value::Number(n) => n.as_f64().context("Value is not a float")?,
            serde_json::Value::String(s) => s
                .trim()
                .parse::<f64>()
                .with_context(|| format!("Value {s:?} is not numeric"))?,
            other => bail!("Unexpected value type: {other}"),
        };

        if !value.is_finite() || value < 0.0 {
            bail!("Consumption must be a non-negative number, got {value}");
        }

        Ok(Reading {
            start_at: DateTime::from_iso(start_at).with_context(|| format!("Invalid startAt {start_at:?}"))?,
            end_at: DateTime::from_iso(end_at).with_context(|| format!("Invalid endAt {end_at:?}"))?,
            value: KiloWattHours(value),
        })
    }
}

/// Validates the raw readings and returns them ordered by start time.
/// Entries that cannot be parsed are skipped.
pub fn parse_readings(raw: &[RawReading]) -> Vec<Reading> {
    let mut readings: Vec<Reading> = raw
        .iter()
        .filter_map(|r| match Reading::try_from(r) {
            Ok(reading) => Some(reading),
            Err(e) => {
                tracing::warn!("Failed to parse reading {:?}: {:#}", r, e);
                None
            }
        })
        .collect();

    readings.sort_by_key(|r| r.start_at);
    readings
}

pub fn summarize(readings: &[Reading], now: DateTime) -> ConsumptionSummary {
    let today_start = now.start_of_day();
    let yesterday_start = today_start.on_prev_day();

    let latest = readings.iter().max_by_key(|r| r.start_at).map(|r| LatestReading {
        value: r.value,
        start_at: r.start_at,
        end_at: r.end_at,
    });

    let today_total: KiloWattHours = readings
        .iter()
        .filter(|r| r.start_at >= today_start)
        .map(|r| r.value)
        .sum();

    let yesterday_total: KiloWattHours = readings
        .iter()
        .filter(|r| r.start_at >= yesterday_start && r.start_at < today_start)
        .map(|r| r.value)
        .sum();

    let summary = ConsumptionSummary {
        latest,
        today_total,
        yesterday_total,
    };

    tracing::debug!(
        "Processed {} readings: latest={:?}, today={}, yesterday={}",
        readings.len(),
        summary.latest.map(|l| l.value),
        summary.today_total,
        summary.yesterday_total
    );

    summary
}
