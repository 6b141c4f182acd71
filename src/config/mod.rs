// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Configuration module

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::streaming::IngestConfig;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application name
    pub app_name: String,

    /// Data directory
    pub data_dir: PathBuf,

    /// Log level
    pub log_level: String,

    /// Use the simulated device instead of MQTT
    pub demo_mode: bool,

    /// Location forecaster
    pub forecast: ForecastConfig,

    /// Off-route detector
    pub anomaly: AnomalyConfig,

    /// Per-fix pipeline
    pub pipeline: PipelineConfig,

    /// MQTT ingestion
    pub ingest: IngestConfig,

    /// History store
    pub database: DatabaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "RouteWatch".to_string(),
            data_dir: PathBuf::from("./data"),
            log_level: "info".to_string(),
            demo_mode: false,
            forecast: ForecastConfig::default(),
            anomaly: AnomalyConfig::default(),
            pipeline: PipelineConfig::default(),
            ingest: IngestConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            config.save(path)?;
            Ok(config)
        }
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("routewatch"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Database file, resolved against `data_dir` when relative.
    pub fn database_path(&self) -> PathBuf {
        if self.database.path.is_absolute() {
            self.database.path.clone()
        } else {
            self.data_dir.join(&self.database.path)
        }
    }
}

/// Location forecaster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Below this many fixes the forecaster extrapolates instead of fitting
    pub min_data_points: usize,

    /// Upper bound for the lag order search
    pub max_lag: usize,

    /// Scale applied to the last step when extrapolating
    pub damping: f64,

    /// Trailing fixes inspected for the no-movement check
    pub variance_window: usize,

    /// Latitude and longitude variance below which the device is "not moving"
    pub min_variance: f64,

    /// ADF p-value at or below which a differenced series counts as stationary
    pub stationarity_significance: f64,

    /// Gaussian jitter (degrees) when only one fix is known
    pub jitter_std_deg: f64,

    /// Uniform jitter half-width (degrees) when the device is not moving
    pub stationary_jitter_deg: f64,

    /// Returned when there is no history at all
    pub default_lat: f64,
    pub default_lon: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            min_data_points: 10,
            max_lag: 5,
            damping: 0.8,
            variance_window: 10,
            min_variance: 1e-8,
            stationarity_significance: 0.05,
            jitter_std_deg: 0.001,
            stationary_jitter_deg: 0.0001,
            default_lat: -7.005,
            default_lon: 110.438,
        }
    }
}

/// Off-route detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// History length required before the detector will flag anything
    pub min_training_points: usize,

    /// History fixes copied into the trail on first use
    pub initial_trail: usize,

    /// Trail capacity
    pub max_trail: usize,

    /// Threshold multiplier inside a frequent location
    pub near_cluster_multiplier: f64,

    /// Below `low_speed_kmh` the threshold is at least this many metres
    pub low_speed_floor_m: f64,
    pub low_speed_kmh: f64,

    /// Above `high_speed_kmh` the threshold is multiplied
    pub high_speed_kmh: f64,
    pub high_speed_multiplier: f64,

    /// Frequent location mining
    pub cluster_max_speed: f64,
    pub cluster_min_count: usize,
    pub cluster_limit: usize,

    /// Re-mine frequent locations after this many calls (0 = never)
    pub cluster_refresh_calls: u64,

    /// Re-mine frequent locations after this many seconds (0 = never)
    pub cluster_refresh_secs: u64,

    /// Base distance thresholds in metres
    pub thresholds: ActivityThresholds,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            min_training_points: 20,
            initial_trail: 100,
            max_trail: 200,
            near_cluster_multiplier: 1.5,
            low_speed_floor_m: 1500.0,
            low_speed_kmh: 2.0,
            high_speed_kmh: 50.0,
            high_speed_multiplier: 2.0,
            cluster_max_speed: 2.0,
            cluster_min_count: 3,
            cluster_limit: 20,
            cluster_refresh_calls: 0,
            cluster_refresh_secs: 0,
            thresholds: ActivityThresholds::default(),
        }
    }
}

/// Per-activity distance thresholds in metres
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityThresholds {
    pub stationary: f64,
    pub walking: f64,
    pub running: f64,
    pub cycling: f64,
    pub driving: f64,
    pub unknown: f64,
}

impl Default for ActivityThresholds {
    fn default() -> Self {
        Self {
            stationary: 2000.0,
            walking: 800.0,
            running: 1200.0,
            cycling: 1500.0,
            driving: 2500.0,
            unknown: 1000.0,
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Recent fixes loaded from the store for each request
    pub history_limit: usize,

    /// Deadline for one fix through the models
    pub request_timeout_ms: u64,

    /// Publish responses back over MQTT
    pub publish_results: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            history_limit: 50,
            request_timeout_ms: 2000,
            publish_results: true,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database path
    pub path: PathBuf,

    /// Retention period in days
    pub retention_days: u32,

    /// Timestamps older than this are replaced by server time
    pub max_age_secs: i64,

    /// Timestamps further ahead than this are replaced by server time
    pub max_future_secs: i64,

    /// Identical fixes stored within this window count as duplicates
    pub duplicate_window_secs: i64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("routewatch.db"),
            retention_days: 30,
            max_age_secs: 3600,
            max_future_secs: 300,
            duplicate_window_secs: 600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut config = Config::default();
        config.anomaly.cluster_refresh_calls = 500;
        config.forecast.max_lag = 3;

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.anomaly.cluster_refresh_calls, 500);
        assert_eq!(parsed.forecast.max_lag, 3);
        assert_eq!(parsed.anomaly.thresholds.driving, 2500.0);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: Config = toml::from_str("log_level = \"debug\"\n[pipeline]\nhistory_limit = 10\n").unwrap();
        assert_eq!(parsed.log_level, "debug");
        assert_eq!(parsed.pipeline.history_limit, 10);
        assert_eq!(parsed.pipeline.request_timeout_ms, 2000);
        assert_eq!(parsed.forecast.min_data_points, 10);
    }

    #[test]
    fn test_database_path_relative_to_data_dir() {
        let mut config = Config::default();
        config.data_dir = PathBuf::from("/var/lib/routewatch");
        assert_eq!(config.database_path(), PathBuf::from("/var/lib/routewatch/routewatch.db"));
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = std::env::temp_dir().join(format!("routewatch-config-{}", std::process::id()));
        let path = dir.join("config.toml");
        let _ = std::fs::remove_file(&path);

        let created = Config::load_or_create(&path).unwrap();
        assert!(path.exists());
        let loaded = Config::load(&path).unwrap();
        assert_eq!(created.app_name, loaded.app_name);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
