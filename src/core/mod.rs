//! Core engine module - runs each fix through the models

mod engine;
mod event_bus;

pub use engine::{Engine, ModelInfo};
pub use event_bus::{AnomalyAlert, Event, EventBus, EventPayload, EventType};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::analysis::{ForecastMethod, GeoPoint};
use crate::detection::ActivityLabel;

/// Per-fix result returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceResponse {
    pub activity: ActivityLabel,
    pub predicted_location: GeoPoint,
    pub is_anomaly: bool,
    pub confidence_scores: ConfidenceScores,
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ConfidenceScores {
    pub activity_confidence: f64,
    pub prediction_accuracy: f64,
    pub anomaly_confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetadata {
    pub timestamp: DateTime<Utc>,
    /// History fixes loaded from the store
    pub data_points_used: usize,
    pub forecast_method: ForecastMethod,
    /// `component:reason` for every model that fell back
    pub fallbacks: Vec<String>,
    /// Whether the fix reached the store
    pub stored: bool,
    pub stored_timestamp: Option<i64>,
    pub model_versions: BTreeMap<&'static str, &'static str>,
}

/// Running counters for the pipeline
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineState {
    pub running: bool,
    pub fixes_processed: u64,
    pub anomalies: u64,
    pub store_failures: u64,
    pub timeouts: u64,
    /// Occurrences of each `component:reason` fallback
    pub fallback_counts: BTreeMap<String, u64>,
    pub last_anomaly: Option<DateTime<Utc>>,
}
