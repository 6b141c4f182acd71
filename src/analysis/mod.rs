//! Analysis module - geodesy, time-series statistics and location forecasting

mod geo;
mod statistics;
mod stationarity;
mod var;
mod forecast;

pub use geo::*;
pub use statistics::*;
pub use stationarity::*;
pub use var::*;
pub use forecast::*;
