//! Streaming module - MQTT ingestion, result publishing and history export

mod mqtt;
mod export;

pub use mqtt::*;
pub use export::*;

use serde::{Deserialize, Serialize};

/// MQTT ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub mqtt_broker: String,
    pub mqtt_port: u16,
    pub mqtt_client_id: String,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub keep_alive_secs: u64,
    pub reconnect_interval_ms: u64,

    /// Device fixes arrive here
    pub topic: String,

    /// Inference responses are published here
    pub result_topic: String,

    /// Off-route alerts are published here
    pub alert_topic: String,

    /// Ignore the device clock and stamp fixes on arrival
    pub use_server_time: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            mqtt_broker: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_client_id: "routewatch".to_string(),
            mqtt_username: None,
            mqtt_password: None,
            keep_alive_secs: 30,
            reconnect_interval_ms: 5000,
            topic: "gps/data".to_string(),
            result_topic: "gps/inference".to_string(),
            alert_topic: "gps/alerts".to_string(),
            use_server_time: false,
        }
    }
}

/// Export format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// One JSON object per line
    Json,
    Csv,
}
