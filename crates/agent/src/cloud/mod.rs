//! Cloud domain — the MQTT bridge, signed HTTP API, telemetry types and
//! the command dispatcher.

pub mod api;
pub mod bridge;
pub mod commands;
pub mod jwt;
pub mod tasks;
pub mod telemetry;

pub use bridge::{CloudBridge, TelemetryPublisher};
pub use telemetry::{ProcessOperation, ProcessType, TelemetryEnvelope};
