//! Telemetry types shared across the harness.

pub mod usage_metrics;
