//! Immutable per-run configuration.

use crate::error::EngineError;
use serde::Serialize;
use std::time::Duration;

/// Timeouts, counts and switches for one test run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunConfig {
    /// Bound on each individual connect attempt.
    pub connect_timeout: Duration,
    /// Extra connect attempts after the first one fails.
    pub retry_count: u32,
    pub verify_timeout: Duration,
    pub verify_poll_interval: Duration,
    pub ping_count: u32,
    pub ping_timeout: Duration,
    pub speed_test_enabled: bool,
    pub speed_test_timeout: Duration,
    pub disconnect_timeout: Duration,
    /// Pause between the end of one endpoint and the start of the next.
    pub inter_endpoint_delay: Duration,
    /// How long an in-flight step may run on after `stop()` before it is abandoned.
    pub stop_grace_period: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            retry_count: 1,
            verify_timeout: Duration::from_secs(15),
            verify_poll_interval: Duration::from_millis(500),
            ping_count: 3,
            ping_timeout: Duration::from_secs(10),
            speed_test_enabled: true,
            speed_test_timeout: Duration::from_secs(90),
            disconnect_timeout: Duration::from_secs(15),
            inter_endpoint_delay: Duration::from_secs(1),
            stop_grace_period: Duration::from_secs(5),
        }
    }
}

impl RunConfig {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        let positive = [
            ("connect_timeout", self.connect_timeout),
            ("verify_timeout", self.verify_timeout),
            ("verify_poll_interval", self.verify_poll_interval),
            ("ping_timeout", self.ping_timeout),
            ("speed_test_timeout", self.speed_test_timeout),
            ("disconnect_timeout", self.disconnect_timeout),
        ];
        for (name, value) in positive {
            if value.is_zero() {
                return Err(EngineError::InvalidConfig(format!("{} must be greater than zero", name)));
            }
        }

        if self.verify_poll_interval > self.verify_timeout {
            return Err(EngineError::InvalidConfig(format!(
                "verify_poll_interval ({:?}) exceeds verify_timeout ({:?})",
                self.verify_poll_interval, self.verify_timeout
            )));
        }

        if self.ping_count == 0 {
            return Err(EngineError::InvalidConfig("ping_count must be at least 1".to_string()));
        }

        Ok(())
    }
}
