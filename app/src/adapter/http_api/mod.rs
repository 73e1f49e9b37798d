use actix_web::{
    HttpResponse, ResponseError,
    http::StatusCode,
    web::{self},
};
use derive_more::derive::{Display, Error};
use serde::Serialize;
use tokio::sync::watch;

use crate::{
    consumption::ConsumptionSummary,
    core::time::DateTime,
    sensor::{EnergySensor, ReadingAttributes, SensorSnapshot, UNIT_OF_MEASUREMENT},
};

type SnapshotRx = watch::Receiver<SensorSnapshot>;

pub fn new_routes(snapshot_rx: SnapshotRx) -> actix_web::Scope {
    web::scope("/api")
        .app_data(web::Data::new(snapshot_rx))
        .route("/sensors", web::get().to(get_sensors))
        .route("/sensors/{key}", web::get().to(get_sensor))
}

#[derive(Debug, Error, Display)]
enum StatusApiError {
    #[display("Unknown sensor {key}")]
    UnknownSensor { key: String },
}

impl ResponseError for StatusApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            StatusApiError::UnknownSensor { .. } => StatusCode::NOT_FOUND,
        }
    }
}

#[derive(Debug, Serialize)]
struct SensorsResponse {
    available: bool,
    updated_at: Option<DateTime>,
    last_error: Option<String>,
    sensors: Vec<SensorState>,
}

#[derive(Debug, Serialize)]
struct SensorState {
    key: String,
    name: &'static str,
    unit_of_measurement: &'static str,
    value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attributes: Option<ReadingAttributes>,
}

impl SensorState {
    fn new(sensor: EnergySensor, summary: Option<&ConsumptionSummary>, available: bool) -> Self {
        let summary = summary.filter(|_| available);

        Self {
            key: sensor.key(),
            name: sensor.name(),
            unit_of_measurement: UNIT_OF_MEASUREMENT,
            value: summary.and_then(|s| sensor.value(s)).map(|v| v.rounded()),
            attributes: summary.and_then(|s| sensor.attributes(s)),
        }
    }
}

fn status_of(snapshot: &SensorSnapshot) -> StatusCode {
    if snapshot.available {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn get_sensors(snapshot_rx: web::Data<SnapshotRx>) -> HttpResponse {
    let snapshot = snapshot_rx.borrow().clone();

    let response = SensorsResponse {
        available: snapshot.available,
        updated_at: snapshot.updated_at,
        last_error: snapshot.last_error.clone(),
        sensors: EnergySensor::ALL
            .iter()
            .map(|sensor| SensorState::new(*sensor, snapshot.summary.as_ref(), snapshot.available))
            .collect(),
    };

    HttpResponse::build(status_of(&snapshot)).json(response)
}

async fn get_sensor(
    path: web::Path<String>,
    snapshot_rx: web::Data<SnapshotRx>,
) -> Result<HttpResponse, StatusApiError> {
    let key = path.into_inner();
    let sensor = EnergySensor::ALL
        .into_iter()
        .find(|s| s.key() == key)
        .ok_or(StatusApiError::UnknownSensor { key })?;

    let snapshot = snapshot_rx.borrow().clone();
    let state = SensorState::new(sensor, snapshot.summary.as_ref(), snapshot.available);

    Ok(HttpResponse::build(status_of(&snapshot)).json(state))
}

#[cfg(test)]
mod tests {
    use actix_web::{App, test};
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    use super::*;
    use crate::{consumption::LatestReading, core::unit::KiloWattHours};

    fn snapshot(available: bool) -> SensorSnapshot {
        SensorSnapshot {
            available,
            summary: Some(ConsumptionSummary {
                latest: Some(LatestReading {
                    value: KiloWattHours(0.2),
                    start_at: DateTime::from_iso("2024-05-02T07:30:00+09:00").unwrap(),
                    end_at: DateTime::from_iso("2024-05-02T08:00:00+09:00").unwrap(),
                }),
                today_total: KiloWattHours(0.5),
                yesterday_total: KiloWattHours(1.0),
            }),
            updated_at: Some(DateTime::from_iso("2024-05-02T08:10:00+09:00").unwrap()),
            last_error: (!available).then(|| "API request failed: 502".to_owned()),
        }
    }

    #[actix_web::test]
    async fn lists_all_sensors() {
        let (_tx, rx) = watch::channel(snapshot(true));
        let app = test::init_service(App::new().service(new_routes(rx))).await;

        let req = test::TestRequest::get().uri("/api/sensors").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_json_eq!(
            body,
            json!({
                "available": true,
                "updated_at": "2024-05-02T08:10:00+09:00",
                "last_error": null,
                "sensors": [
                    {
                        "key": "electricity_latest",
                        "name": "Latest Electricity Reading",
                        "unit_of_measurement": "kWh",
                        "value": 0.2,
                        "attributes": {
                            "reading_start": "2024-05-02T07:30:00+09:00",
                            "reading_end": "2024-05-02T08:00:00+09:00"
                        }
                    },
                    {
                        "key": "electricity_today",
                        "name": "Today's Electricity Usage",
                        "unit_of_measurement": "kWh",
                        "value": 0.5
                    },
                    {
                        "key": "electricity_yesterday",
                        "name": "Yesterday's Electricity Usage",
                        "unit_of_measurement": "kWh",
                        "value": 1.0
                    }
                ]
            })
        );
    }

    #[actix_web::test]
    async fn unavailable_sensors_answer_with_503_and_no_values() {
        let (_tx, rx) = watch::channel(snapshot(false));
        let app = test::init_service(App::new().service(new_routes(rx))).await;

        let req = test::TestRequest::get().uri("/api/sensors").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["last_error"], json!("API request failed: 502"));
        assert_eq!(body["sensors"][1]["value"], json!(null));
    }

    #[actix_web::test]
    async fn single_sensor_by_key() {
        let (_tx, rx) = watch::channel(snapshot(true));
        let app = test::init_service(App::new().service(new_routes(rx))).await;

        let req = test::TestRequest::get().uri("/api/sensors/electricity_today").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["value"], json!(0.5));

        let req = test::TestRequest::get().uri("/api/sensors/gas_today").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
