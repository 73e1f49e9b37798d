use crate::sensor::EnergySensor;

pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    discovery_prefix: String,
    base: String,
}

impl Topics {
    pub fn new(discovery_prefix: &str, base_topic: &str, account_number: &str) -> Self {
        Self {
            discovery_prefix: discovery_prefix.trim_end_matches('/').to_owned(),
            base: format!("{}/{}", base_topic.trim_end_matches('/'), account_number),
        }
    }

    /// Format: `{discovery_prefix}/sensor/{account}_{key}/config`
    pub fn config(&self, unique_id: &str) -> String {
        format!("{}/sensor/{}/config", self.discovery_prefix, unique_id)
    }

    /// Home Assistant announces `online` here after (re)starting.
    pub fn birth(&self) -> String {
        format!("{}/status", self.discovery_prefix)
    }

    pub fn state(&self, sensor: EnergySensor) -> String {
        format!("{}/{}", self.base, sensor)
    }

    pub fn attributes(&self, sensor: EnergySensor) -> String {
        format!("{}/{}/attributes", self.base, sensor)
    }

    pub fn availability(&self) -> String {
        format!("{}/availability", self.base)
    }
}
