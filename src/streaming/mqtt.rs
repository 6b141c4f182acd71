// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! MQTT ingestion and result publishing

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::IngestConfig;
use crate::device::{Fix, FixSource};

fn mqtt_options(config: &IngestConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.mqtt_client_id, &config.mqtt_broker, config.mqtt_port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

    if let (Some(username), Some(password)) = (&config.mqtt_username, &config.mqtt_password) {
        options.set_credentials(username, password);
    }
    options
}

/// Subscribes to the device topic and yields normalized fixes.
pub struct MqttSource {
    client: AsyncClient,
    eventloop: EventLoop,
    config: IngestConfig,
    name: String,
}

impl MqttSource {
    pub async fn connect(config: &IngestConfig) -> Result<Self> {
        let (client, eventloop) = AsyncClient::new(mqtt_options(config), 100);

        client
            .subscribe(&config.topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| anyhow!("MQTT subscribe failed: {}", e))?;

        info!(
            "MQTT source for {}:{} topic {}",
            config.mqtt_broker, config.mqtt_port, config.topic
        );

        Ok(Self {
            client,
            eventloop,
            name: format!("mqtt://{}:{}/{}", config.mqtt_broker, config.mqtt_port, config.topic),
            config: config.clone(),
        })
    }

    /// Handle for publishing on the same connection.
    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
        }
    }

    fn decode(&self, topic: &str, payload: &[u8]) -> Option<Fix> {
        let now = Utc::now().timestamp();
        match Fix::from_payload(payload, now) {
            Ok(mut fix) => {
                if self.config.use_server_time {
                    fix.timestamp = now;
                }
                Some(fix)
            }
            Err(e) => {
                warn!("Dropping payload on {}: {}", topic, e);
                None
            }
        }
    }
}

#[async_trait]
impl FixSource for MqttSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_fix(&mut self) -> Result<Option<Fix>> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("MQTT connected");
                    // Clean sessions drop subscriptions on reconnect.
                    self.client
                        .subscribe(&self.config.topic, QoS::AtLeastOnce)
                        .await
                        .map_err(|e| anyhow!("MQTT subscribe failed: {}", e))?;
                }
                Ok(Event::Incoming(Packet::Publish(msg))) => {
                    debug!("MQTT received on {} ({} bytes)", msg.topic, msg.payload.len());
                    if let Some(fix) = self.decode(&msg.topic, &msg.payload) {
                        return Ok(Some(fix));
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("MQTT error: {:?}", e);
                    tokio::time::sleep(Duration::from_millis(self.config.reconnect_interval_ms)).await;
                }
            }
        }
    }
}

/// Publishes JSON payloads through a shared client.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub async fn publish<T: Serialize>(&self, topic: &str, payload: &T) -> Result<()> {
        let json = serde_json::to_vec(payload)?;

        self.client
            .publish(topic, QoS::AtLeastOnce, false, json)
            .await
            .map_err(|e| anyhow!("MQTT publish failed: {}", e))?;

        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.client
            .disconnect()
            .await
            .map_err(|e| anyhow!("MQTT disconnect failed: {}", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_decode_respects_server_time_flag() {
        let mut config = IngestConfig::default();
        config.use_server_time = true;
        let source = MqttSource::connect(&config).await.unwrap();

        let fix = source
            .decode("gps/data", br#"{"lat": 1.0, "lon": 2.0, "speed": 5, "timestamp": 42}"#)
            .unwrap();
        assert!(fix.timestamp > 42);
        assert!(source.decode("gps/data", b"{}").is_none());
    }

    #[test]
    fn test_options_from_config() {
        let mut config = IngestConfig::default();
        config.mqtt_username = Some("device".to_string());
        config.mqtt_password = Some("secret".to_string());
        let options = mqtt_options(&config);
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
    }
}
