//! Configuration types for response capture.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Pause between seeing a matching response and asking for its body.
    pub grace_delay_ms: u64,
    /// Upper bound for a single body fetch.
    pub body_timeout_ms: u64,
    /// Default bound used by callers waiting for a captured value.
    pub ready_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            grace_delay_ms: 200,
            body_timeout_ms: 5_000,
            ready_timeout_ms: 10_000,
        }
    }
}

impl CaptureConfig {
    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_delay_ms)
    }

    pub fn body_timeout(&self) -> Duration {
        Duration::from_millis(self.body_timeout_ms.max(1))
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}
