#![allow(async_fn_in_trait)]

use std::time::Duration;

use infrastructure::meter;
use tokio::{sync::watch, time::MissedTickBehavior};

use crate::{
    adapter::kraken::KrakenError,
    consumption::{RawReading, parse_readings, summarize},
    core::time::DateTime,
    sensor::{EnergySensor, SensorSnapshot},
};

const LOOKBACK_HOURS: i64 = 48;

pub trait ReadingSource {
    async fn fetch_readings(&mut self, from: DateTime, to: DateTime) -> Result<Vec<RawReading>, KrakenError>;
}

pub trait SensorPublisher {
    async fn announce(&self) -> anyhow::Result<()>;
    async fn publish(&self, snapshot: &SensorSnapshot) -> anyhow::Result<()>;
}

/// Polls the readings on a fixed interval and keeps the sensors up to date.
///
/// Failed polls mark the sensors unavailable and keep the last known values;
/// the next scheduled poll is the only retry.
pub struct ConsumptionCoordinator<S, P>
where
    S: ReadingSource,
    P: SensorPublisher,
{
    source: S,
    publisher: P,
    interval: Duration,
    snapshot_tx: watch::Sender<SensorSnapshot>,
}

impl<S, P> ConsumptionCoordinator<S, P>
where
    S: ReadingSource,
    P: SensorPublisher,
{
    pub fn new(source: S, publisher: P, interval: Duration) -> Self {
        let (snapshot_tx, _) = watch::channel(SensorSnapshot::default());

        Self {
            source,
            publisher,
            interval,
            snapshot_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SensorSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> SensorSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Announces the sensors and performs the initial poll. Only an
    /// authentication failure is returned, other failures are left to the
    /// scheduled polls.
    pub async fn first_refresh(&mut self) -> Result<(), KrakenError> {
        if let Err(e) = self.publisher.announce().await {
            tracing::error!("Error announcing sensors: {:?}", e);
        }

        match self.refresh().await {
            Err(e) if e.is_auth() => Err(e),
            _ => Ok(()),
        }
    }

    pub async fn run(mut self) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut interval = tokio::time::interval_at(start, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            //errors are already logged and reflected in the snapshot
            let _ = self.refresh().await;
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn refresh(&mut self) -> Result<(), KrakenError> {
        let now = DateTime::now();
        let result = self.source.fetch_readings(now.hours_before(LOOKBACK_HOURS), now).await;

        let (snapshot, result) = match result {
            Ok(raw) => {
                let summary = summarize(&parse_readings(&raw), now);
                meter::increment("consumption_poll", &[("result", "success")]);

                let snapshot = SensorSnapshot {
                    available: true,
                    summary: Some(summary),
                    updated_at: Some(now),
                    last_error: None,
                };
                (snapshot, Ok(()))
            }
            Err(e) => {
                if e.is_auth() {
                    tracing::error!("Authentication failed, re-authentication required: {}", e);
                    meter::increment("consumption_poll", &[("result", "auth_error")]);
                } else {
                    tracing::warn!("Error fetching data: {}", e);
                    meter::increment("consumption_poll", &[("result", "fetch_error")]);
                }

                let previous = self.snapshot();
                let snapshot = SensorSnapshot {
                    available: false,
                    last_error: Some(e.to_string()),
                    ..previous
                };
                (snapshot, Err(e))
            }
        };

        record_values(&snapshot);
        self.snapshot_tx.send_replace(snapshot.clone());

        if let Err(e) = self.publisher.publish(&snapshot).await {
            tracing::error!("Error publishing sensor state: {:?}", e);
        }

        result
    }
}

fn record_values(snapshot: &SensorSnapshot) {
    for sensor in EnergySensor::ALL {
        if let Some(value) = snapshot.value(sensor) {
            let key = sensor.key();
            meter::set("energy_consumption_kwh", value.0, &[("sensor", key.as_str())]);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    use serde_json::json;

    use super::*;
    use crate::core::{time::FIXED_NOW, unit::KiloWattHours};

    #[derive(Default)]
    struct FakeSource {
        results: VecDeque<Result<Vec<RawReading>, KrakenError>>,
        requested: Vec<(DateTime, DateTime)>,
    }

    impl FakeSource {
        fn returning(results: Vec<Result<Vec<RawReading>, KrakenError>>) -> Self {
            Self {
                results: results.into(),
                ..Default::default()
            }
        }
    }

    impl ReadingSource for FakeSource {
        async fn fetch_readings(&mut self, from: DateTime, to: DateTime) -> Result<Vec<RawReading>, KrakenError> {
            self.requested.push((from, to));
            self.results.pop_front().unwrap_or_else(|| Ok(vec![]))
        }
    }

    #[derive(Clone, Default)]
    struct RecordingPublisher {
        announced: Arc<Mutex<usize>>,
        published: Arc<Mutex<Vec<SensorSnapshot>>>,
        fail: bool,
    }

    impl SensorPublisher for RecordingPublisher {
        async fn announce(&self) -> anyhow::Result<()> {
            *self.announced.lock().unwrap() += 1;
            Ok(())
        }

        async fn publish(&self, snapshot: &SensorSnapshot) -> anyhow::Result<()> {
            self.published.lock().unwrap().push(snapshot.clone());
            if self.fail {
                anyhow::bail!("broker gone");
            }
            Ok(())
        }
    }

    fn raw(start_at: &str, value: f64) -> RawReading {
        let start = DateTime::from_iso(start_at).unwrap();
        RawReading {
            start_at: Some(start.to_iso_string()),
            end_at: Some((start + chrono::TimeDelta::minutes(30)).to_iso_string()),
            value: Some(json!(value.to_string())),
        }
    }

    fn readings() -> Vec<RawReading> {
        vec![
            raw("2024-05-01T08:00:00+09:00", 0.4),
            raw("2024-05-01T20:00:00+09:00", 0.6),
            raw("2024-05-02T07:00:00+09:00", 0.3),
            raw("2024-05-02T07:30:00+09:00", 0.2),
        ]
    }

    fn now() -> DateTime {
        DateTime::from_iso("2024-05-02T08:10:00+09:00").unwrap()
    }

    fn new_coordinator(
        results: Vec<Result<Vec<RawReading>, KrakenError>>,
    ) -> (ConsumptionCoordinator<FakeSource, RecordingPublisher>, RecordingPublisher) {
        let publisher = RecordingPublisher::default();
        let coordinator = ConsumptionCoordinator::new(
            FakeSource::returning(results),
            publisher.clone(),
            Duration::from_secs(30 * 60),
        );
        (coordinator, publisher)
    }

    #[tokio::test]
    async fn valid_poll_yields_three_non_negative_values() {
        let (mut coordinator, publisher) = new_coordinator(vec![Ok(readings())]);

        FIXED_NOW.scope(now(), coordinator.refresh()).await.unwrap();

        let snapshot = coordinator.snapshot();
        assert!(snapshot.available);
        assert_eq!(snapshot.updated_at, Some(now()));
        assert_eq!(snapshot.value(EnergySensor::Latest), Some(KiloWattHours(0.2)));
        assert_eq!(snapshot.value(EnergySensor::Today).map(|v| v.rounded()), Some(0.5));
        assert_eq!(snapshot.value(EnergySensor::Yesterday).map(|v| v.rounded()), Some(1.0));
        for sensor in EnergySensor::ALL {
            assert!(snapshot.value(sensor).unwrap().0 >= 0.0);
        }

        assert_eq!(publisher.published.lock().unwrap().as_slice(), &[snapshot]);
    }

    #[tokio::test]
    async fn poll_requests_last_48_hours() {
        let (mut coordinator, _) = new_coordinator(vec![Ok(vec![])]);

        FIXED_NOW.scope(now(), coordinator.refresh()).await.unwrap();

        assert_eq!(
            coordinator.source.requested,
            vec![(DateTime::from_iso("2024-04-30T08:10:00+09:00").unwrap(), now())]
        );
    }

    #[tokio::test]
    async fn empty_readings_keep_sensors_available() {
        let (mut coordinator, _) = new_coordinator(vec![Ok(vec![])]);

        FIXED_NOW.scope(now(), coordinator.refresh()).await.unwrap();

        let snapshot = coordinator.snapshot();
        assert!(snapshot.available);
        assert_eq!(snapshot.value(EnergySensor::Latest), None);
        assert_eq!(snapshot.value(EnergySensor::Today), Some(KiloWattHours::ZERO));
    }

    #[tokio::test]
    async fn fetch_failure_marks_sensors_unavailable_and_keeps_last_values() {
        let (mut coordinator, publisher) = new_coordinator(vec![Ok(readings()), Err(KrakenError::api("Empty response"))]);

        FIXED_NOW.scope(now(), coordinator.refresh()).await.unwrap();
        let err = FIXED_NOW.scope(now(), coordinator.refresh()).await.unwrap_err();

        assert!(!err.is_auth());
        let snapshot = coordinator.snapshot();
        assert!(!snapshot.available);
        assert_eq!(snapshot.last_error.as_deref(), Some("Empty response"));
        assert!(snapshot.summary.is_some());
        assert_eq!(snapshot.value(EnergySensor::Today), None);
        assert_eq!(publisher.published.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn recovers_on_next_successful_poll() {
        let (mut coordinator, _) = new_coordinator(vec![Err(KrakenError::api("API request failed: 503")), Ok(readings())]);

        let _ = FIXED_NOW.scope(now(), coordinator.refresh()).await;
        assert!(!coordinator.snapshot().available);

        FIXED_NOW.scope(now(), coordinator.refresh()).await.unwrap();
        let snapshot = coordinator.snapshot();
        assert!(snapshot.available);
        assert_eq!(snapshot.last_error, None);
    }

    #[tokio::test]
    async fn first_refresh_fails_only_on_auth_errors() {
        let (mut coordinator, publisher) = new_coordinator(vec![Err(KrakenError::auth("Invalid data."))]);

        let err = FIXED_NOW.scope(now(), coordinator.first_refresh()).await.unwrap_err();

        assert!(err.is_auth());
        assert_eq!(*publisher.announced.lock().unwrap(), 1);
        assert!(!coordinator.snapshot().available);

        let (mut coordinator, _) = new_coordinator(vec![Err(KrakenError::api("API request failed: 500"))]);
        FIXED_NOW.scope(now(), coordinator.first_refresh()).await.unwrap();
        assert!(!coordinator.snapshot().available);
    }

    #[tokio::test]
    async fn publish_failure_does_not_fail_the_poll() {
        let publisher = RecordingPublisher {
            fail: true,
            ..Default::default()
        };
        let mut coordinator =
            ConsumptionCoordinator::new(FakeSource::returning(vec![Ok(readings())]), publisher, Duration::from_secs(60));

        FIXED_NOW.scope(now(), coordinator.refresh()).await.unwrap();

        assert!(coordinator.snapshot().available);
    }

    #[tokio::test(start_paused = true)]
    async fn run_polls_on_interval() {
        let (coordinator, publisher) = new_coordinator(vec![]);
        let mut rx = coordinator.subscribe();

        tokio::spawn(coordinator.run());

        tokio::time::sleep(Duration::from_secs(29 * 60)).await;
        assert!(publisher.published.lock().unwrap().is_empty());

        rx.changed().await.unwrap();
        assert!(rx.borrow().available);

        tokio::time::sleep(Duration::from_secs(31 * 60)).await;
        assert_eq!(publisher.published.lock().unwrap().len(), 2);
    }
}
