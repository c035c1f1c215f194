//! Health check endpoint payload
//!
//! Basic liveness information served at `/health` for monitoring systems.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Health status (always "healthy" if responding)
    pub status: String,

    /// Current timestamp in seconds since Unix epoch
    pub timestamp: u64,

    /// Server version
    pub version: String,

    /// Number of active sessions
    pub session_count: usize,

    /// Server uptime in seconds
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct HealthChecker {
    start_time: SystemTime,
    version: String,
}

impl HealthChecker {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            start_time: SystemTime::now(),
            version: version.into(),
        }
    }

    pub fn get_status(&self, session_count: usize) -> HealthStatus {
        let now = SystemTime::now();
        let timestamp = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let uptime_seconds = now
            .duration_since(self.start_time)
            .unwrap_or_default()
            .as_secs();

        HealthStatus {
            status: "healthy".to_string(),
            timestamp,
            version: self.version.clone(),
            session_count,
            uptime_seconds,
        }
    }

    pub fn get_json_status(&self, session_count: usize) -> serde_json::Value {
        serde_json::to_value(self.get_status(session_count)).unwrap_or_else(|_| {
            serde_json::json!({
                "status": "error",
                "message": "Failed to serialize health status"
            })
        })
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_VERSION"))
    }
}
