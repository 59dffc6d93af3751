//! Metric names recorded by the relay.

/// Envelopes accepted by the transport (counter, labels: scope).
pub const RELAY_PUBLISH_TOTAL: &str = "relay_publish_total";
/// Publishes abandoned after every attempt failed (counter, labels: scope).
pub const RELAY_PUBLISH_FAILURES_TOTAL: &str = "relay_publish_failures_total";
/// Publish attempts that were retried (counter).
pub const RELAY_PUBLISH_RETRIES_TOTAL: &str = "relay_publish_retries_total";
/// Inbound envelopes dropped because they failed to decode (counter).
pub const RELAY_DECODE_FAILURES_TOTAL: &str = "relay_decode_failures_total";
/// Handler invocations from the dispatch loop (counter).
pub const RELAY_DISPATCH_TOTAL: &str = "relay_dispatch_total";
/// Registered handlers (gauge).
pub const RELAY_HANDLERS: &str = "relay_handlers";
