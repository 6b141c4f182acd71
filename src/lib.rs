// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! RouteWatch - streaming GPS inference
//!
//! Every fix from a field device produces three derived outputs:
//! - a predicted next location (VAR forecaster with damped extrapolation fallback)
//! - a transportation-mode label from speed bands
//! - an off-route flag against recent trail and frequently visited places
//!
//! Raw fixes and labels are persisted to SQLite; later fixes use them as history.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       RouteWatch Engine                      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌────────────┐   ┌───────────┐   ┌─────────┐ │
//! │  │ MQTT /   │ → │ Classifier │ → │ Forecaster│ → │Detector │ │
//! │  │ Simulator│   │            │   │   (VAR)   │   │         │ │
//! │  └──────────┘   └────────────┘   └───────────┘   └─────────┘ │
//! │        ↓               ↓               ↓              ↓      │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │                       Event Bus                        │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │        ↓                                              ↓      │
//! │  ┌──────────┐                                   ┌──────────┐ │
//! │  │ Database │                                   │  Export  │ │
//! │  └──────────┘                                   └──────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod analysis;
pub mod config;
pub mod core;
pub mod db;
pub mod detection;
pub mod device;
pub mod error;
pub mod streaming;

// Re-exports for convenience
pub use analysis::{haversine_meters, GeoPoint, LocationForecaster};
pub use config::Config;
pub use core::{Engine, EventBus, InferenceResponse};
pub use db::{Database, HistoryStore};
pub use detection::{ActivityClassifier, ActivityLabel, AnomalyDetector};
pub use device::Fix;
pub use error::{FallbackReason, PayloadError};

/// RouteWatch version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// RouteWatch name
pub const NAME: &str = "RouteWatch";
