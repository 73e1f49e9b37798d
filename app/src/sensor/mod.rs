use derive_more::derive::Display;
use serde::Serialize;

use crate::{
    consumption::ConsumptionSummary,
    core::{time::DateTime, unit::KiloWattHours},
};

pub const UNIT_OF_MEASUREMENT: &str = "kWh";
pub const DEVICE_CLASS: &str = "energy";
pub const MANUFACTURER: &str = "Octopus Energy Japan";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergySensor {
    #[display("electricity_latest")]
    Latest,
    #[display("electricity_today")]
    Today,
    #[display("electricity_yesterday")]
    Yesterday,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    #[display("measurement")]
    Measurement,
    #[display("total")]
    Total,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadingAttributes {
    pub reading_start: String,
    pub reading_end: String,
}

impl EnergySensor {
    pub const ALL: [EnergySensor; 3] = [EnergySensor::Latest, EnergySensor::Today, EnergySensor::Yesterday];

    pub fn key(&self) -> String {
        self.to_string()
    }

    pub fn name(&self) -> &'static str {
        match self {
            EnergySensor::Latest => "Latest Electricity Reading",
            EnergySensor::Today => "Today's Electricity Usage",
            EnergySensor::Yesterday => "Yesterday's Electricity Usage",
        }
    }

    pub fn state_class(&self) -> StateClass {
        match self {
            EnergySensor::Latest => StateClass::Measurement,
            EnergySensor::Today | EnergySensor::Yesterday => StateClass::Total,
        }
    }

    pub fn has_attributes(&self) -> bool {
        matches!(self, EnergySensor::Latest)
    }

    pub fn value(&self, summary: &ConsumptionSummary) -> Option<KiloWattHours> {
        match self {
            EnergySensor::Latest => summary.latest.map(|l| l.value),
            EnergySensor::Today => Some(summary.today_total),
            EnergySensor::Yesterday => Some(summary.yesterday_total),
        }
    }

    pub fn attributes(&self, summary: &ConsumptionSummary) -> Option<ReadingAttributes> {
        match (self, &summary.latest) {
            (EnergySensor::Latest, Some(latest)) => Some(ReadingAttributes {
                reading_start: latest.start_at.to_iso_string(),
                reading_end: latest.end_at.to_iso_string(),
            }),
            _ => None,
        }
    }
}

/// The account all sensors belong to, shown as a service device in Home Assistant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorDevice {
    account_number: String,
}

impl SensorDevice {
    pub fn new(account_number: impl Into<String>) -> Self {
        Self {
            account_number: account_number.into(),
        }
    }

    pub fn account_number(&self) -> &str {
        &self.account_number
    }

    pub fn identifier(&self) -> String {
        format!("octopus_energy_jp_{}", self.account_number)
    }

    pub fn name(&self) -> String {
        format!("Octopus Energy Japan ({})", self.account_number)
    }

    pub fn unique_id(&self, sensor: EnergySensor) -> String {
        format!("{}_{}", self.account_number, sensor)
    }
}

/// Last known state of the sensors, replaced after every poll.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SensorSnapshot {
    pub available: bool,
    pub summary: Option<ConsumptionSummary>,
    pub updated_at: Option<DateTime>,
    pub last_error: Option<String>,
}

impl SensorSnapshot {
    pub fn value(&self, sensor: EnergySensor) -> Option<KiloWattHours> {
        if !self.available {
            return None;
        }

        self.summary.as_ref().and_then(|s| sensor.value(s))
    }
}
