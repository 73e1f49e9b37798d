mod client;
mod receiver;
mod sender;

pub use client::Mqtt;
pub use receiver::{MqttInMessage, MqttSubscription};
pub use sender::MqttSender;

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    host: String,
    port: u16,
    client_id: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

impl MqttConfig {
    /// Broker publishes `payload` retained on `topic` when the connection drops unexpectedly.
    pub fn new_client_with_last_will(&self, topic: impl Into<String>, payload: impl Into<String>) -> Mqtt {
        let credentials = match (&self.username, &self.password) {
            (Some(user), Some(password)) => Some((user.clone(), password.clone())),
            _ => None,
        };

        Mqtt::connect(
            &self.host,
            self.port,
            &self.client_id,
            credentials,
            (topic.into(), payload.into()),
        )
    }
}
