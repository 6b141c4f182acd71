// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Event bus for inter-component communication

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use super::InferenceResponse;
use crate::detection::ActivityLabel;
use crate::device::Fix;

/// Event types in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventType {
    FixReceived,
    Inference,
    Alert,
    Error,
}

/// Generic event wrapper
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub id: u64,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize)]
pub enum EventPayload {
    Fix(Fix),
    Inference(Box<InferenceResponse>),
    Alert(AnomalyAlert),
    Error { message: String },
}

/// Raised for every fix the detector flags as off-route.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyAlert {
    pub fix: Fix,
    pub activity: ActivityLabel,
    pub min_distance_m: Option<f64>,
    pub threshold_m: f64,
    pub confidence: f64,
    pub raised_at: DateTime<Utc>,
}

/// Central event bus for pub/sub communication
pub struct EventBus {
    fix_tx: broadcast::Sender<Fix>,
    response_tx: broadcast::Sender<InferenceResponse>,
    alert_tx: broadcast::Sender<AnomalyAlert>,
    event_tx: broadcast::Sender<Event>,
    event_counter: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (fix_tx, _) = broadcast::channel(capacity);
        let (response_tx, _) = broadcast::channel(capacity);
        let (alert_tx, _) = broadcast::channel(capacity);
        let (event_tx, _) = broadcast::channel(capacity);

        Self {
            fix_tx,
            response_tx,
            alert_tx,
            event_tx,
            event_counter: AtomicU64::new(0),
        }
    }

    pub fn publish_fix(&self, fix: Fix) {
        let _ = self.fix_tx.send(fix);
        self.publish_event(EventType::FixReceived, EventPayload::Fix(fix));
    }

    pub fn publish_response(&self, response: InferenceResponse) {
        let _ = self.response_tx.send(response.clone());
        self.publish_event(EventType::Inference, EventPayload::Inference(Box::new(response)));
    }

    pub fn publish_alert(&self, alert: AnomalyAlert) {
        let _ = self.alert_tx.send(alert.clone());
        self.publish_event(EventType::Alert, EventPayload::Alert(alert));
    }

    pub fn publish_error(&self, message: &str) {
        self.publish_event(
            EventType::Error,
            EventPayload::Error {
                message: message.to_string(),
            },
        );
    }

    fn publish_event(&self, event_type: EventType, payload: EventPayload) {
        let id = self.event_counter.fetch_add(1, Ordering::Relaxed);
        let event = Event {
            id,
            event_type,
            timestamp: Utc::now(),
            payload,
        };
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe_fixes(&self) -> broadcast::Receiver<Fix> {
        self.fix_tx.subscribe()
    }

    pub fn subscribe_responses(&self) -> broadcast::Receiver<InferenceResponse> {
        self.response_tx.subscribe()
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<AnomalyAlert> {
        self.alert_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
