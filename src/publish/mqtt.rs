//! MQTT publishing backend using rumqttc.
//!
//! Sensor values go to retained `<prefix>/<sensor key>` topics. Commands are
//! read from `<prefix>/command`, rider changes from `<prefix>/weight/set` and
//! `<prefix>/resistance/set`, and broker-side availability is kept on
//! `<prefix>/availability` through a last will.

use super::{BridgeCommand, PublishError, SensorPublisher, SensorUpdate};
use crossbeam::channel::Sender;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Requests buffered between the client and the event loop.
const CHANNEL_CAPACITY: usize = 64;

const AVAILABILITY_ONLINE: &str = "online";
const AVAILABILITY_OFFLINE: &str = "offline";

/// MQTT configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Whether MQTT is enabled
    pub enabled: bool,
    /// Broker hostname or IP
    pub broker_host: String,
    /// Broker port
    pub broker_port: u16,
    /// Username for authentication (optional)
    pub username: Option<String>,
    /// Password for authentication (optional)
    pub password: Option<String>,
    /// Client ID for MQTT connection
    pub client_id: String,
    /// Prefix of all topics
    pub topic_prefix: String,
    /// Keep-alive interval in seconds
    pub keep_alive_secs: u64,
    /// Delay before polling again after a connection error, in seconds
    pub reconnect_interval_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            username: None,
            password: None,
            client_id: format!(
                "deskbike-{}",
                Uuid::new_v4()
                    .to_string()
                    .split('-')
                    .next()
                    .unwrap_or("default")
            ),
            topic_prefix: "deskbike".to_string(),
            keep_alive_secs: 60,
            reconnect_interval_secs: 5,
        }
    }
}

impl MqttConfig {
    fn prefix(&self) -> &str {
        self.topic_prefix.trim_end_matches('/')
    }

    /// Topic of one sensor.
    pub fn state_topic(&self, key: &str) -> String {
        format!("{}/{}", self.prefix(), key)
    }

    /// Topic commands are read from.
    pub fn command_topic(&self) -> String {
        format!("{}/command", self.prefix())
    }

    /// Topic rider weight changes are read from.
    pub fn weight_topic(&self) -> String {
        format!("{}/weight/set", self.prefix())
    }

    /// Topic resistance changes are read from.
    pub fn resistance_topic(&self) -> String {
        format!("{}/resistance/set", self.prefix())
    }

    /// Every topic the bridge listens on.
    pub fn subscriptions(&self) -> [String; 3] {
        [
            self.command_topic(),
            self.weight_topic(),
            self.resistance_topic(),
        ]
    }

    /// Topic carrying online/offline.
    pub fn availability_topic(&self) -> String {
        format!("{}/availability", self.prefix())
    }

    fn options(&self) -> MqttOptions {
        let mut options =
            MqttOptions::new(self.client_id.clone(), self.broker_host.clone(), self.broker_port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs.max(5)));
        options.set_last_will(LastWill::new(
            self.availability_topic(),
            AVAILABILITY_OFFLINE,
            QoS::AtLeastOnce,
            true,
        ));
        if let Some(username) = &self.username {
            options.set_credentials(username.clone(), self.password.clone().unwrap_or_default());
        }
        options
    }
}

/// Parse an incoming publish into a command if it was sent to one of our topics.
pub fn parse_command(topic: &str, payload: &[u8], config: &MqttConfig) -> Option<BridgeCommand> {
    let parse: fn(&str) -> Option<BridgeCommand> = if topic == config.command_topic() {
        BridgeCommand::parse
    } else if topic == config.weight_topic() {
        BridgeCommand::parse_weight
    } else if topic == config.resistance_topic() {
        BridgeCommand::parse_resistance
    } else {
        return None;
    };

    let text = std::str::from_utf8(payload).ok()?;
    let command = parse(text);
    if command.is_none() {
        tracing::warn!("Ignoring invalid payload on {}: {:?}", topic, text);
    }
    command
}

/// Publisher writing retained sensor topics.
pub struct MqttPublisher {
    client: AsyncClient,
    config: MqttConfig,
}

impl MqttPublisher {
    /// Create the client. Nothing is sent until the returned event loop is driven.
    pub fn connect(config: MqttConfig) -> (Self, MqttEventLoop) {
        tracing::info!(
            "Connecting to MQTT broker {}:{}",
            config.broker_host,
            config.broker_port
        );

        let (client, eventloop) = AsyncClient::new(config.options(), CHANNEL_CAPACITY);

        let pump = MqttEventLoop {
            client: client.clone(),
            eventloop,
            config: config.clone(),
            reconnect_interval: Duration::from_secs(config.reconnect_interval_secs),
        };

        (Self { client, config }, pump)
    }
}

impl SensorPublisher for MqttPublisher {
    fn publish(&mut self, update: &SensorUpdate) -> Result<(), PublishError> {
        let topic = self.config.state_topic(update.key.key());
        self.client
            .try_publish(topic, QoS::AtLeastOnce, true, update.value.render())
            .map_err(|e| PublishError::PublishFailed(e.to_string()))
    }

    /// Mark the bridge offline and disconnect.
    fn close(&mut self) {
        if let Err(e) = self.client.try_publish(
            self.config.availability_topic(),
            QoS::AtLeastOnce,
            true,
            AVAILABILITY_OFFLINE,
        ) {
            tracing::debug!("Failed to publish offline state: {}", e);
        }
        if let Err(e) = self.client.try_disconnect() {
            tracing::debug!("MQTT disconnect failed: {}", e);
        }
    }
}

/// Drives the MQTT connection and forwards commands.
pub struct MqttEventLoop {
    client: AsyncClient,
    eventloop: EventLoop,
    config: MqttConfig,
    reconnect_interval: Duration,
}

impl MqttEventLoop {
    /// Poll until the command receiver goes away.
    pub async fn run(mut self, commands: Sender<BridgeCommand>) {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("Connected to MQTT broker");
                    self.on_connected();
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let Some(command) =
                        parse_command(&publish.topic, &publish.payload, &self.config)
                    else {
                        continue;
                    };
                    tracing::info!("Received command: {}", command);
                    if commands.send(command).is_err() {
                        break;
                    }
                }
                Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("MQTT connection error: {}", e);
                    tokio::time::sleep(self.reconnect_interval).await;
                }
            }
        }

        tracing::info!("MQTT event loop stopped");
    }

    fn on_connected(&self) {
        for topic in self.config.subscriptions() {
            if let Err(e) = self.client.try_subscribe(topic.clone(), QoS::AtLeastOnce) {
                tracing::error!("Failed to subscribe to {}: {}", topic, e);
            }
        }

        if let Err(e) = self.client.try_publish(
            self.config.availability_topic(),
            QoS::AtLeastOnce,
            true,
            AVAILABILITY_ONLINE,
        ) {
            tracing::debug!("Failed to publish online state: {}", e);
        }
    }
}
