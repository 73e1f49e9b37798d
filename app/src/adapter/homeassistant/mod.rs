mod discovery;
mod topic;

use discovery::HaSensorDiscovery;
use infrastructure::{Mqtt, MqttSender, MqttSubscription};
use serde::Deserialize;
use tokio::sync::watch;
use topic::{PAYLOAD_OFFLINE, PAYLOAD_ONLINE};

pub use topic::Topics;

use crate::{
    coordinator::SensorPublisher,
    sensor::{EnergySensor, SensorDevice, SensorSnapshot},
};

#[derive(Debug, Deserialize, Clone)]
pub struct HomeAssistant {
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,
    #[serde(default = "default_base_topic")]
    pub base_topic: String,
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_owned()
}

fn default_base_topic() -> String {
    "octopus_energy_jp".to_owned()
}

impl Default for HomeAssistant {
    fn default() -> Self {
        Self {
            discovery_prefix: default_discovery_prefix(),
            base_topic: default_base_topic(),
        }
    }
}

impl HomeAssistant {
    pub fn topics(&self, device: &SensorDevice) -> Topics {
        Topics::new(&self.discovery_prefix, &self.base_topic, device.account_number())
    }

    pub fn new_publisher(&self, sender: MqttSender, device: SensorDevice) -> HaSensorPublisher {
        let topics = self.topics(&device);
        HaSensorPublisher { sender, device, topics }
    }

    pub async fn new_birth_listener(
        &self,
        mqtt: &mut Mqtt,
        publisher: HaSensorPublisher,
        snapshot_rx: watch::Receiver<SensorSnapshot>,
    ) -> anyhow::Result<HaBirthListener> {
        let rx = mqtt.subscribe(publisher.topics.birth()).await?;

        Ok(HaBirthListener {
            rx,
            connections: mqtt.connections(),
            republisher: Republisher { publisher, snapshot_rx },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RetainedMessage {
    topic: String,
    payload: String,
}

impl RetainedMessage {
    fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Publishes the energy sensors via Home Assistant MQTT discovery.
#[derive(Clone)]
pub struct HaSensorPublisher {
    sender: MqttSender,
    device: SensorDevice,
    topics: Topics,
}

impl HaSensorPublisher {
    async fn send_all(&self, messages: Vec<RetainedMessage>) -> anyhow::Result<()> {
        for msg in messages {
            self.sender.send_retained(msg.topic, msg.payload).await?;
        }

        Ok(())
    }
}

impl SensorPublisher for HaSensorPublisher {
    async fn announce(&self) -> anyhow::Result<()> {
        tracing::info!("Announcing sensors of account {}", self.device.account_number());
        self.send_all(discovery_messages(&self.device, &self.topics)?).await
    }

    async fn publish(&self, snapshot: &SensorSnapshot) -> anyhow::Result<()> {
        self.send_all(state_messages(&self.topics, snapshot)?).await
    }
}

fn discovery_messages(device: &SensorDevice, topics: &Topics) -> anyhow::Result<Vec<RetainedMessage>> {
    EnergySensor::ALL
        .iter()
        .map(|sensor| {
            let discovery = HaSensorDiscovery::new(*sensor, device, topics);
            let payload = serde_json::to_string(&discovery)?;
            Ok(RetainedMessage::new(topics.config(&discovery.unique_id), payload))
        })
        .collect()
}

fn state_messages(topics: &Topics, snapshot: &SensorSnapshot) -> anyhow::Result<Vec<RetainedMessage>> {
    let summary = match (&snapshot.summary, snapshot.available) {
        (Some(summary), true) => summary,
        _ => return Ok(vec![RetainedMessage::new(topics.availability(), PAYLOAD_OFFLINE)]),
    };

    let mut messages = vec![];

    for sensor in EnergySensor::ALL {
        let state = match sensor.value(summary) {
            Some(value) => value.rounded().to_string(),
            None => "None".to_owned(),
        };
        messages.push(RetainedMessage::new(topics.state(sensor), state));

        if sensor.has_attributes() {
            let attributes = match sensor.attributes(summary) {
                Some(attributes) => serde_json::to_string(&attributes)?,
                None => "{}".to_owned(),
            };
            messages.push(RetainedMessage::new(topics.attributes(sensor), attributes));
        }
    }

    //Online last, so Home Assistant never shows stale states as available
    messages.push(RetainedMessage::new(topics.availability(), PAYLOAD_ONLINE));

    Ok(messages)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RepublishTrigger {
    HomeAssistantStatus(String),
    Reconnected(u64),
}

/// Re-announces the sensors and their last state whenever Home Assistant
/// comes back online or the broker connection is re-established, replacing
/// the `offline` last will.
pub struct HaBirthListener {
    rx: MqttSubscription,
    connections: watch::Receiver<u64>,
    republisher: Republisher<HaSensorPublisher>,
}

impl HaBirthListener {
    pub async fn run(mut self) {
        loop {
            let trigger = tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some(msg) => RepublishTrigger::HomeAssistantStatus(msg.payload),
                    None => {
                        tracing::warn!("Home Assistant status subscription closed");
                        return;
                    }
                },
                changed = self.connections.changed() => match changed {
                    Ok(()) => RepublishTrigger::Reconnected(*self.connections.borrow_and_update()),
                    Err(_) => {
                        tracing::warn!("MQTT connection monitor closed");
                        return;
                    }
                },
            };

            self.republisher.handle(trigger).await;
        }
    }
}

struct Republisher<P: SensorPublisher> {
    publisher: P,
    snapshot_rx: watch::Receiver<SensorSnapshot>,
}

impl<P: SensorPublisher> Republisher<P> {
    async fn handle(&self, trigger: RepublishTrigger) -> bool {
        match trigger {
            RepublishTrigger::HomeAssistantStatus(status) if status != PAYLOAD_ONLINE => {
                tracing::debug!("Home Assistant status changed to {}", status);
                return false;
            }
            RepublishTrigger::HomeAssistantStatus(_) => {
                tracing::info!("Home Assistant is online, re-announcing sensors");
            }
            //first connection, the initial refresh already published everything
            RepublishTrigger::Reconnected(connections) if connections <= 1 => return false,
            RepublishTrigger::Reconnected(_) => {
                tracing::info!("Reconnected to MQTT broker, re-announcing sensors");
            }
        }

        if let Err(e) = self.publisher.announce().await {
            tracing::error!("Error re-announcing sensors: {:?}", e);
            return false;
        }

        let snapshot = self.snapshot_rx.borrow().clone();
        if let Err(e) = self.publisher.publish(&snapshot).await {
            tracing::error!("Error re-publishing sensor state: {:?}", e);
            return false;
        }

        true
    }
}
