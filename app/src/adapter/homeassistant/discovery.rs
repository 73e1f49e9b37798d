//! Home Assistant MQTT discovery payloads.
//!
//! Field names follow the MQTT sensor schema of Home Assistant.

use serde::Serialize;

use crate::sensor::{DEVICE_CLASS, EnergySensor, MANUFACTURER, SensorDevice, StateClass, UNIT_OF_MEASUREMENT};

use super::topic::Topics;

#[derive(Debug, Clone, Serialize)]
pub struct HaDeviceInfo {
    pub identifiers: Vec<String>,
    pub name: String,
    pub manufacturer: &'static str,
    pub sw_version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct HaSensorDiscovery {
    pub name: &'static str,
    pub unique_id: String,
    pub state_topic: String,
    pub availability_topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_attributes_topic: Option<String>,
    pub unit_of_measurement: &'static str,
    pub device_class: &'static str,
    pub state_class: StateClass,
    pub device: HaDeviceInfo,
}

impl From<&SensorDevice> for HaDeviceInfo {
    fn from(device: &SensorDevice) -> Self {
        Self {
            identifiers: vec![device.identifier()],
            name: device.name(),
            manufacturer: MANUFACTURER,
            sw_version: env!("CARGO_PKG_VERSION"),
        }
    }
}

impl HaSensorDiscovery {
    pub fn new(sensor: EnergySensor, device: &SensorDevice, topics: &Topics) -> Self {
        Self {
            name: sensor.name(),
            unique_id: device.unique_id(sensor),
            state_topic: topics.state(sensor),
            availability_topic: topics.availability(),
            json_attributes_topic: sensor.has_attributes().then(|| topics.attributes(sensor)),
            unit_of_measurement: UNIT_OF_MEASUREMENT,
            device_class: DEVICE_CLASS,
            state_class: sensor.state_class(),
            device: device.into(),
        }
    }
}
