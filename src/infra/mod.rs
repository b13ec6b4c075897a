//! Runtime bootstrap: errors, telemetry and the demo HTTP surface.

pub mod error;
pub mod http;
pub mod telemetry;
