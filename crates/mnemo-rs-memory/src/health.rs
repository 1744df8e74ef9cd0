//! Provider health reporting.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};

/// Self-reported operational state of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Result of a single provider health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub latency: Duration,
    pub details: serde_json::Value,
}

impl HealthStatus {
    pub fn healthy(latency: Duration, details: serde_json::Value) -> Self {
        Self {
            status: HealthState::Healthy,
            latency,
            details,
        }
    }

    pub fn degraded(latency: Duration, details: serde_json::Value) -> Self {
        Self {
            status: HealthState::Degraded,
            latency,
            details,
        }
    }

    pub fn unhealthy(latency: Duration, details: serde_json::Value) -> Self {
        Self {
            status: HealthState::Unhealthy,
            latency,
            details,
        }
    }

    /// Unhealthy status carrying an error message.
    pub fn from_error(started: Instant, error: impl std::fmt::Display) -> Self {
        Self::unhealthy(started.elapsed(), json!({ "error": error.to_string() }))
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}
