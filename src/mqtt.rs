use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info};
use rumqttc::{MqttOptions, QoS, SubscribeFilter};
use tokio::sync::broadcast;

use crate::{
    config,
    messages::{BrokerAnnouncement, DiscoveryPackage},
};

/// Command channel of the remote antenna switch.
#[async_trait]
pub trait AntennaCommander: Send + Sync {
    async fn set_antenna(&self, code: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct MqttClient {
    client: rumqttc::AsyncClient,
    presence_topic: String,
    antenna_command_topic: String,
    antenna_result_topic: String,
}

impl MqttClient {
    pub fn new(config: &config::MqttConfig) -> (Self, rumqttc::EventLoop) {
        let publisher_id = config
            .publisher_id
            .clone()
            .unwrap_or_else(|| "shack-relay".to_string());

        let mut mqttoptions = MqttOptions::new(
            publisher_id,
            config.host.clone(),
            config.port.unwrap_or(1883),
        );

        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.unwrap_or(5)));

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = rumqttc::AsyncClient::new(mqttoptions, 10);

        (
            MqttClient {
                client,
                presence_topic: config
                    .presence_topic
                    .clone()
                    .unwrap_or_else(|| "flex/discovery".to_string()),
                antenna_command_topic: config
                    .antenna_command_topic
                    .clone()
                    .unwrap_or_else(|| "ant/cmd".to_string()),
                antenna_result_topic: config
                    .antenna_result_topic
                    .clone()
                    .unwrap_or_else(|| "ant/res".to_string()),
            },
            eventloop,
        )
    }

    pub async fn subscribe(&self) -> Result<(), rumqttc::ClientError> {
        self.client
            .subscribe_many(vec![
                SubscribeFilter::new(self.presence_topic.clone(), QoS::AtMostOnce),
                SubscribeFilter::new(self.antenna_result_topic.clone(), QoS::AtMostOnce),
            ])
            .await?;

        Ok(())
    }

    pub async fn event_loop(
        &self,
        eventloop: &mut rumqttc::EventLoop,
        tx: broadcast::Sender<BrokerAnnouncement>,
    ) {
        loop {
            match eventloop.poll().await {
                Ok(notification) => match notification {
                    rumqttc::Event::Incoming(rumqttc::Packet::Publish(p)) => {
                        debug!("Received MQTT message on topic {}: {:?}", p.topic, p.payload);

                        let Some(message) = self.classify(&p.topic, &p.payload) else {
                            continue;
                        };

                        if let Err(err) = tx.send(message) {
                            error!("Error announcing broker message: {:?}", err);
                        }
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::SubAck(_)) => {
                        debug!("Subscription acknowledged");
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_)) => {
                        debug!("Connection acknowledged");
                        if let Err(err) = self.subscribe().await {
                            error!("Error subscribing to MQTT topics: {:?}", err);
                        }
                    }
                    _ => {}
                },
                Err(e) => {
                    error!("Error polling MQTT event loop: {:?}", e);
                    // rumqttc reconnects on the next poll
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Turns a raw publish into an announcement; undecodable presence
    /// documents are dropped.
    fn classify(&self, topic: &str, payload: &[u8]) -> Option<BrokerAnnouncement> {
        if topic == self.presence_topic {
            match serde_json::from_slice::<DiscoveryPackage>(payload) {
                Ok(package) => Some(BrokerAnnouncement::Presence(package)),
                Err(err) => {
                    debug!("Dropping malformed presence document: {}", err);
                    None
                }
            }
        } else if topic == self.antenna_result_topic {
            Some(BrokerAnnouncement::AntennaPatched(
                String::from_utf8_lossy(payload).trim().to_string(),
            ))
        } else {
            debug!("Ignoring message on unexpected topic {}", topic);
            None
        }
    }

    pub async fn disconnect(&self) -> Result<(), rumqttc::ClientError> {
        debug!("Disconnecting MQTT client");
        self.client.disconnect().await
    }
}

#[async_trait]
impl AntennaCommander for MqttClient {
    async fn set_antenna(&self, code: &str) -> anyhow::Result<()> {
        info!("Publishing antenna command {:?}", code);
        self.client
            .publish(
                self.antenna_command_topic.clone(),
                QoS::AtMostOnce,
                false,
                code.to_string(),
            )
            .await?;
        Ok(())
    }
}
