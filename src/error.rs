//! Error taxonomy for the test engine and the CLI-backed collaborators.

use crate::engine::FailureCause;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single protocol step while driving one endpoint.
///
/// These never escape [`crate::engine::EndpointRunner`]: each one is turned
/// into a terminal status plus a cause on the endpoint's result.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("connect to {hostname} failed after {attempts} attempt(s): {reason}")]
    Connect {
        hostname: String,
        attempts: u32,
        reason: String,
    },

    #[error("connection to {hostname} not verified within {timeout:?}")]
    VerifyTimeout { hostname: String, timeout: Duration },

    #[error("controller reports {actual} while verifying {expected}")]
    VerifyMismatch { expected: String, actual: String },

    #[error("ping failed: {0}")]
    Ping(String),

    #[error("speed test failed: {0}")]
    SpeedTest(String),

    #[error("disconnect failed: {0}")]
    Disconnect(String),
}

/// Errors reported synchronously to callers of the orchestrator.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("a test run or connect is already in progress")]
    AlreadyRunning,

    #[error("invalid run configuration: {0}")]
    InvalidConfig(String),

    #[error("endpoint {0} appears more than once in the run")]
    DuplicateEndpoint(String),

    #[error("no Tokio runtime available to host the run")]
    NoRuntime,

    #[error("connect to {hostname} failed ({cause}): {detail}")]
    ConnectNow {
        hostname: String,
        cause: FailureCause,
        detail: String,
    },
}

/// Errors raised by the external command-line tools.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool} not found (is it installed and on PATH?)")]
    NotFound { tool: String },

    #[error("{tool} exited with code {code}: {stderr}")]
    Failed {
        tool: String,
        code: i32,
        stderr: String,
    },

    #[error("{tool} produced unusable output: {detail}")]
    Parse { tool: String, detail: String },
}

impl ToolError {
    /// Map a spawn failure to `NotFound` when the binary is missing.
    pub fn from_spawn(tool: &str, err: std::io::Error) -> anyhow::Error {
        if err.kind() == std::io::ErrorKind::NotFound {
            ToolError::NotFound {
                tool: tool.to_string(),
            }
            .into()
        } else {
            anyhow::Error::new(err).context(format!("failed to execute {}", tool))
        }
    }
}
