//! Outbound transport to the remote backend.

pub mod telemetry;

pub use telemetry::{
    HttpTelemetryClient, LatestTelemetry, NullTelemetry, TelemetryConfig, TelemetryPayload,
    TelemetrySink,
};
