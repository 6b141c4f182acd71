//! Detection module - activity classification and off-route detection

mod classification;
mod anomaly;

pub use classification::*;
pub use anomaly::*;
