// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Pipeline engine
//!
//! For each fix: load recent history, classify, forecast, assess, persist.
//! Every model owns its state behind its own lock, so concurrent fixes are
//! serialized per model. Model failures degrade, they are never returned.

use anyhow::Result;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::{AnomalyAlert, ConfidenceScores, EngineState, EventBus, InferenceResponse, ResponseMetadata};
use crate::analysis::{ForecastModelInfo, LocationForecaster};
use crate::config::Config;
use crate::db::HistoryStore;
use crate::detection::{ActivityClassifier, ActivityContext, AnomalyDetector, ClassifierInfo, DetectorInfo};
use crate::device::{Fix, FixSource};

/// Introspection snapshot of all three models.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub forecaster: ForecastModelInfo,
    pub classifier: ClassifierInfo,
    pub detector: DetectorInfo,
}

pub struct Engine {
    pub config: Arc<Config>,
    store: Arc<dyn HistoryStore>,
    classifier: ActivityClassifier,
    forecaster: Mutex<LocationForecaster>,
    detector: Mutex<AnomalyDetector>,
    event_bus: Arc<EventBus>,
    state: RwLock<EngineState>,
}

impl Engine {
    pub fn new(config: Arc<Config>, store: Arc<dyn HistoryStore>, event_bus: Arc<EventBus>) -> Self {
        let forecaster = LocationForecaster::new(config.forecast.clone());
        Self::with_forecaster(config, store, event_bus, forecaster)
    }

    /// Use a specific forecaster, e.g. one with a fixed seed.
    pub fn with_forecaster(
        config: Arc<Config>,
        store: Arc<dyn HistoryStore>,
        event_bus: Arc<EventBus>,
        forecaster: LocationForecaster,
    ) -> Self {
        let detector = AnomalyDetector::new(config.anomaly.clone());
        Self {
            config,
            store,
            classifier: ActivityClassifier::new(),
            forecaster: Mutex::new(forecaster),
            detector: Mutex::new(detector),
            event_bus,
            state: RwLock::new(EngineState::default()),
        }
    }

    /// Run one fix through the pipeline. Blocking: store access and model
    /// fitting happen on the calling thread.
    pub fn process(&self, fix: Fix) -> InferenceResponse {
        let now = Utc::now();

        let history = match self.store.recent_fixes(self.config.pipeline.history_limit) {
            Ok(history) => history,
            Err(e) => {
                warn!("History unavailable, continuing without it: {:#}", e);
                Vec::new()
            }
        };

        let mut fallbacks = Vec::new();

        let (activity, activity_confidence) = self.classifier.classify_with_confidence(fix.speed);

        let mut window = Vec::with_capacity(history.len() + 1);
        window.extend_from_slice(&history);
        window.push(fix);
        let (prediction, prediction_accuracy) = {
            let mut forecaster = self.forecaster.lock();
            let prediction = forecaster.predict_next(&window, 1);
            let confidence = forecaster.confidence(&window);
            (prediction, confidence)
        };
        if let Some(reason) = &prediction.fallback {
            fallbacks.push(format!("forecast:{}", reason.tag()));
        }

        let assessment = {
            let mut detector = self.detector.lock();
            if detector.wants_clusters(history.len(), now.timestamp()) {
                match self.store.frequent_locations(&detector.cluster_query()) {
                    Ok(clusters) => {
                        info!("Mined {} frequent locations", clusters.len());
                        detector.load_clusters(clusters, now.timestamp());
                    }
                    Err(e) => warn!("Frequent location mining failed: {:#}", e),
                }
            }
            detector.assess(&fix, &history, ActivityContext::from(activity))
        };
        if let Some(reason) = &assessment.fallback {
            fallbacks.push(format!("anomaly:{}", reason.tag()));
        }

        let (stored, stored_timestamp) = match self.store.append_fix(&fix, activity, assessment.is_anomaly) {
            Ok(outcome) => (true, Some(outcome.stored_timestamp)),
            Err(e) => {
                error!("Failed to store fix: {:#}", e);
                self.event_bus.publish_error(&format!("store: {}", e));
                (false, None)
            }
        };

        let response = InferenceResponse {
            activity,
            predicted_location: prediction.point,
            is_anomaly: assessment.is_anomaly,
            confidence_scores: ConfidenceScores {
                activity_confidence,
                prediction_accuracy,
                anomaly_confidence: assessment.confidence,
            },
            metadata: ResponseMetadata {
                timestamp: now,
                data_points_used: history.len(),
                forecast_method: prediction.method,
                fallbacks,
                stored,
                stored_timestamp,
                model_versions: model_versions(),
            },
        };

        {
            let mut state = self.state.write();
            state.fixes_processed += 1;
            if !stored {
                state.store_failures += 1;
            }
            if response.is_anomaly {
                state.anomalies += 1;
                state.last_anomaly = Some(now);
            }
            for tag in &response.metadata.fallbacks {
                *state.fallback_counts.entry(tag.clone()).or_insert(0) += 1;
            }
        }

        debug!(
            "Fix ({:.5}, {:.5}) -> {} / {} / anomaly={}",
            fix.lat,
            fix.lon,
            activity,
            prediction.method.as_str(),
            response.is_anomaly
        );

        if response.is_anomaly {
            warn!(
                "Off-route fix at ({:.5}, {:.5}): {:.0} m from nearest normal place, threshold {:.0} m",
                fix.lat,
                fix.lon,
                assessment.min_distance_m.unwrap_or(f64::NAN),
                assessment.threshold_m
            );
            self.event_bus.publish_alert(AnomalyAlert {
                fix,
                activity,
                min_distance_m: assessment.min_distance_m,
                threshold_m: assessment.threshold_m,
                confidence: assessment.confidence,
                raised_at: now,
            });
        }
        self.event_bus.publish_response(response.clone());

        response
    }

    /// [`process`](Self::process) on the blocking pool under the configured
    /// deadline. `None` when the deadline passes or the task panics.
    pub async fn process_with_deadline(self: &Arc<Self>, fix: Fix) -> Option<InferenceResponse> {
        let deadline = Duration::from_millis(self.config.pipeline.request_timeout_ms);
        let engine = Arc::clone(self);
        let task = tokio::task::spawn_blocking(move || engine.process(fix));

        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(response)) => Some(response),
            Ok(Err(e)) => {
                error!("Pipeline task failed: {}", e);
                self.event_bus.publish_error(&format!("pipeline: {}", e));
                None
            }
            Err(_) => {
                warn!("Fix at {} exceeded the {:?} deadline", fix.timestamp, deadline);
                self.state.write().timeouts += 1;
                None
            }
        }
    }

    /// Pull fixes from `source` until it is exhausted or shutdown fires.
    pub async fn run<S>(self: Arc<Self>, source: &mut S, mut shutdown: broadcast::Receiver<()>) -> Result<()>
    where
        S: FixSource + ?Sized,
    {
        let name = source.name().to_string();
        info!("Pipeline reading from {}", name);
        self.state.write().running = true;

        loop {
            tokio::select! {
                next = source.next_fix() => match next {
                    Ok(Some(fix)) => {
                        self.event_bus.publish_fix(fix);
                        self.process_with_deadline(fix).await;
                    }
                    Ok(None) => {
                        info!("Source {} exhausted", name);
                        break;
                    }
                    Err(e) => {
                        warn!("Source {} error: {:#}", name, e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                },
                _ = shutdown.recv() => {
                    info!("Pipeline shutting down...");
                    break;
                }
            }
        }

        self.state.write().running = false;
        Ok(())
    }

    pub fn state(&self) -> EngineState {
        self.state.read().clone()
    }

    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            forecaster: self.forecaster.lock().model_info(),
            classifier: self.classifier.model_info(),
            detector: self.detector.lock().model_info(),
        }
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

fn model_versions() -> BTreeMap<&'static str, &'static str> {
    let mut versions = BTreeMap::new();
    versions.insert("forecaster", "var-1.0");
    versions.insert("classifier", "speed-bands-1.0");
    versions.insert("detector", "normal-places-1.0");
    versions
}
