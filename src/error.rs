// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Error types shared by the inference pipeline.
//!
//! Model components never fail outright. When a component cannot produce its
//! full-fidelity answer it reports a [`FallbackReason`] next to the degraded
//! answer, so the trigger stays visible to callers and tests instead of being
//! buried in a log line.

use thiserror::Error;

/// Why a model component answered with a lower-fidelity result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FallbackReason {
    /// Not enough history to run the model.
    #[error("insufficient data: have {have}, need {need}")]
    InsufficientData { have: usize, need: usize },

    /// Recent fixes barely move; a model fit would be degenerate.
    #[error("no meaningful movement in recent fixes")]
    NoMovement,

    /// Normal equations were singular or not positive definite.
    #[error("singular design matrix: {0}")]
    SingularMatrix(String),

    /// Residual covariance has a non-positive determinant.
    #[error("degenerate residual covariance")]
    DegenerateCovariance,

    /// The series is too short for the requested lag structure.
    #[error("series too short: {len} observations for lag {lag}")]
    SeriesTooShort { len: usize, lag: usize },

    /// A computed value was NaN or infinite.
    #[error("non-finite value in {0}")]
    NonFinite(&'static str),
}

impl FallbackReason {
    /// Short stable tag, used in response metadata and counters.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::InsufficientData { .. } => "insufficient_data",
            Self::NoMovement => "no_movement",
            Self::SingularMatrix(_) => "singular_matrix",
            Self::DegenerateCovariance => "degenerate_covariance",
            Self::SeriesTooShort { .. } => "series_too_short",
            Self::NonFinite(_) => "non_finite",
        }
    }
}

/// Raw payload could not be normalized into a [`crate::device::Fix`].
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing or non-numeric {0}")]
    MissingCoordinate(&'static str),

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}
