//! `/health` endpoint.

use std::time::Instant;

use relay_core::InstanceId;
use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// This process instance.
    pub instance_id: String,
    /// Pub/sub backend name.
    pub transport: String,
    /// Tutors with a live connection on this instance.
    pub connections: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    instance_id: &InstanceId,
    transport: &str,
    connections: usize,
) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        instance_id: instance_id.to_string(),
        transport: transport.to_string(),
        connections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), &InstanceId::new(), "memory", 0);
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, &InstanceId::new(), "memory", 0);
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let id = InstanceId::from("relay_test");
        let resp = health_check(Instant::now(), &id, "redis", 3);
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["instance_id"], "relay_test");
        assert_eq!(parsed["transport"], "redis");
        assert_eq!(parsed["connections"], 3);
        assert!(parsed["uptime_secs"].is_number());
    }
}
