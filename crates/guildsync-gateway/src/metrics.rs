//! Metric names recorded by the engine.
//!
//! The library records through the `metrics` facade only; installing an
//! exporter is left to the embedding application.

/// Dispatched events (counter, labels: event).
pub const GATEWAY_DISPATCH_TOTAL: &str = "gateway_dispatch_total";
/// Envelopes dropped as malformed (counter).
pub const GATEWAY_MALFORMED_ENVELOPES_TOTAL: &str = "gateway_malformed_envelopes_total";
/// Reconnects (counter, labels: resume).
pub const GATEWAY_RECONNECTS_TOTAL: &str = "gateway_reconnects_total";
/// Finished correlations (counter, labels: outcome).
pub const GATEWAY_CORRELATIONS_TOTAL: &str = "gateway_correlations_total";
/// Heartbeats that went unacknowledged (counter).
pub const GATEWAY_HEARTBEAT_MISSED_TOTAL: &str = "gateway_heartbeat_missed_total";
