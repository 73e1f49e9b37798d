use std::sync::Arc;

use rumqttc::v5::{
    mqttbytes::{
        v5::{ConnectProperties, LastWill, Packet, Publish, SubscribeProperties},
        QoS,
    },
    AsyncClient, EventLoop, MqttOptions,
};

use rumqttc::v5::Event::Incoming;
use tokio::sync::{mpsc, watch};

use super::*;

pub struct Mqtt {
    client: Arc<AsyncClient>,
    event_loop: EventLoop,
    subscriptions: Vec<MqttSubscriptionHandle>,
    connections: watch::Sender<u64>,
}

struct MqttSubscriptionHandle {
    topic: String,
    txs: Vec<mpsc::Sender<MqttInMessage>>,
}

impl Mqtt {
    pub fn connect(
        host: &str,
        port: u16,
        client_id: &str,
        credentials: Option<(String, String)>,
        last_will: (String, String),
    ) -> Self {
        let mut mqttoptions = MqttOptions::new(client_id, host, port);
        mqttoptions.set_keep_alive(::std::time::Duration::from_secs(30));
        mqttoptions.set_clean_start(false);

        if let Some((user, password)) = credentials {
            mqttoptions.set_credentials(user, password);
        }

        let (will_topic, will_payload) = last_will;
        mqttoptions.set_last_will(LastWill::new(will_topic, will_payload, QoS::AtLeastOnce, true, None));

        let mut connect_props = ConnectProperties::new();
        connect_props.session_expiry_interval = 60.into();
        connect_props.max_packet_size = Some(1024 * 1024);
        mqttoptions.set_connect_properties(connect_props);

        let (client, event_loop) = AsyncClient::new(mqttoptions, 10);
        let (connections, _) = watch::channel(0);

        Mqtt {
            client: Arc::new(client),
            event_loop,
            subscriptions: vec![],
            connections,
        }
    }

    pub async fn subscribe(&mut self, topic: impl Into<String>) -> anyhow::Result<MqttSubscription> {
        let topic = topic.into();
        let (tx, rx) = mpsc::channel::<MqttInMessage>(32);

        if let Some(subscription) = self.subscriptions.iter_mut().find(|s| s.topic == topic) {
            tracing::info!("Adding subscriber to existing subscription: {:?}", &topic);
            subscription.txs.push(tx);
            return Ok(MqttSubscription::new(rx));
        }

        tracing::info!("Creating new subscription for topic: {:?}", &topic);

        self.subscriptions.push(MqttSubscriptionHandle {
            topic: topic.clone(),
            txs: vec![tx],
        });

        self.client
            .subscribe_with_properties(topic, QoS::AtLeastOnce, subscribe_properties(self.subscriptions.len()))
            .await?;

        Ok(MqttSubscription::new(rx))
    }

    pub fn sender(&self) -> MqttSender {
        MqttSender::new(self.client.clone())
    }

    /// Counts established connections. Changes after the first one signal a
    /// reconnect, where retained state published by this client may have
    /// been replaced by its last will.
    pub fn connections(&self) -> watch::Receiver<u64> {
        self.connections.subscribe()
    }

    pub async fn run(mut self) {
        //Drives the connection and forwards incoming messages
        loop {
            match self.event_loop.poll().await {
                Ok(Incoming(Packet::Publish(publish))) => {
                    forward_publish(&self.subscriptions, publish).await;
                }
                Ok(Incoming(Packet::ConnAck(ack))) => {
                    let count = *self.connections.borrow() + 1;

                    if count == 1 {
                        tracing::info!("Connected to MQTT broker");
                    } else {
                        tracing::info!(
                            "Reconnected to MQTT broker (session present: {})",
                            ack.session_present
                        );
                        self.resubscribe();
                    }

                    self.connections.send_replace(count);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("MQTT error: {}", e);
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                }
            }
        }
    }

    //The broker drops the session after its expiry interval, taking the subscriptions with it
    fn resubscribe(&self) {
        for (idx, subscription) in self.subscriptions.iter().enumerate() {
            if let Err(e) = self.client.try_subscribe_with_properties(
                subscription.topic.clone(),
                QoS::AtLeastOnce,
                subscribe_properties(idx + 1),
            ) {
                tracing::error!("Error resubscribing to {}: {}", subscription.topic, e);
            }
        }
    }
}

fn subscribe_properties(id: usize) -> SubscribeProperties {
    SubscribeProperties {
        id: Some(id), //must be > 0
        user_properties: vec![],
    }
}

async fn forward_publish(subscriptions: &[MqttSubscriptionHandle], msg: Publish) {
    let mqtt_in_message: MqttInMessage = match (&msg).try_into() {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("Error parsing MQTT message: {}", e);
            return;
        }
    };

    tracing::trace!("Received MQTT message on topic {}", mqtt_in_message.topic);

    let subscription_ids = match msg.properties {
        Some(p) => p.subscription_identifiers,
        None => {
            tracing::error!("No subscription identifiers in MQTT message");
            return;
        }
    };

    for id in subscription_ids {
        let Some(sub) = id.checked_sub(1).and_then(|idx| subscriptions.get(idx)) else {
            tracing::error!("No subscription for id: {}", id);
            continue;
        };

        for tx in sub.txs.iter() {
            if let Err(e) = tx
                .send_timeout(mqtt_in_message.clone(), tokio::time::Duration::from_secs(5))
                .await
            {
                tracing::error!("Failed to forward MQTT message to subscriber {}: {}", sub.topic, e);
            }
        }
    }
}
