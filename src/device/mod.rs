//! Device module - GPS fixes, payload normalization and fix sources

mod traits;
mod simulator;

pub use traits::{sanitize_speed, Fix, FixSource};
pub use simulator::DeviceSimulator;
