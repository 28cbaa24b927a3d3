//! Result and state types shared between the runner, the orchestrator and sinks.

use crate::relay::Endpoint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Per-endpoint protocol status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Pending,
    Connecting,
    Verifying,
    Pinging,
    SpeedTesting,
    Completed,
    Failed,
    Timeout,
    Skipped,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Status::Completed | Status::Failed | Status::Timeout | Status::Skipped
        )
    }

    /// Failure terminals; each carries a [`FailureCause`].
    pub fn is_failure(self) -> bool {
        matches!(self, Status::Failed | Status::Timeout | Status::Skipped)
    }

    /// Position in the happy path, `None` for terminals.
    fn step_rank(self) -> Option<u8> {
        match self {
            Status::Pending => Some(0),
            Status::Connecting => Some(1),
            Status::Verifying => Some(2),
            Status::Pinging => Some(3),
            Status::SpeedTesting => Some(4),
            _ => None,
        }
    }

    /// Whether `self -> next` is a legal move within one attempt.
    pub fn can_transition_to(self, next: Status) -> bool {
        let Some(current) = self.step_rank() else {
            return false;
        };
        match next {
            Status::Failed | Status::Timeout | Status::Skipped => true,
            Status::Completed => matches!(self, Status::Pinging | Status::SpeedTesting),
            _ => next.step_rank().is_some_and(|n| n > current),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Pending => "Pending",
            Status::Connecting => "Connecting",
            Status::Verifying => "Verifying",
            Status::Pinging => "Pinging",
            Status::SpeedTesting => "Speed Testing",
            Status::Completed => "Completed",
            Status::Failed => "Failed",
            Status::Timeout => "Timeout",
            Status::Skipped => "Skipped",
        };
        write!(f, "{}", s)
    }
}

/// Which step produced a failure terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureCause {
    Connect,
    Verify,
    VerifyMismatch,
    Ping,
    #[serde(rename = "speedtest")]
    SpeedTest,
    Stopped,
}

impl FailureCause {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureCause::Connect => "connect",
            FailureCause::Verify => "verify",
            FailureCause::VerifyMismatch => "verify-mismatch",
            FailureCause::Ping => "ping",
            FailureCause::SpeedTest => "speedtest",
            FailureCause::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time a status was entered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub status: Status,
    pub at: DateTime<Utc>,
}

/// Outcome record for one endpoint. Cloned into every progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointResult {
    pub endpoint: Endpoint,
    pub status: Status,
    pub cause: Option<FailureCause>,
    pub ping_ms: Option<f64>,
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
    /// Detail text of the failure that set `cause`.
    pub error: Option<String>,
    /// Set when cleanup failed; never changes `status`.
    pub disconnect_error: Option<String>,
    pub connect_attempts: u32,
    pub transitions: Vec<Transition>,
}

impl EndpointResult {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            status: Status::Pending,
            cause: None,
            ping_ms: None,
            download_mbps: None,
            upload_mbps: None,
            error: None,
            disconnect_error: None,
            connect_attempts: 0,
            transitions: vec![Transition {
                status: Status::Pending,
                at: Utc::now(),
            }],
        }
    }

    pub fn hostname(&self) -> &str {
        &self.endpoint.hostname
    }

    /// Move to a non-failure status. Illegal moves are logged and ignored.
    pub fn advance(&mut self, next: Status) -> bool {
        if !self.status.can_transition_to(next) {
            warn!(
                hostname = %self.endpoint.hostname,
                from = %self.status,
                to = %next,
                "Ignoring illegal status transition"
            );
            return false;
        }
        self.status = next;
        self.transitions.push(Transition {
            status: next,
            at: Utc::now(),
        });
        true
    }

    /// Move to a failure terminal, recording cause and detail.
    pub fn fail(&mut self, status: Status, cause: FailureCause, detail: impl Into<String>) -> bool {
        debug_assert!(status.is_failure());
        if !self.advance(status) {
            return false;
        }
        self.cause = Some(cause);
        self.error = Some(detail.into());
        true
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Status plus cause, e.g. `Failed (speedtest)`.
    pub fn status_label(&self) -> String {
        match self.cause {
            Some(cause) => format!("{} ({})", self.status, cause),
            None => self.status.to_string(),
        }
    }
}

/// Lifecycle phase of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    Idle,
    Running,
    Paused,
    Stopping,
    Finished,
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    Completed,
    StoppedByUser,
    Failed,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinishReason::Completed => write!(f, "completed"),
            FinishReason::StoppedByUser => write!(f, "stopped by user"),
            FinishReason::Failed => write!(f, "failed"),
        }
    }
}

/// Point-in-time copy of the run state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: Option<Uuid>,
    pub phase: RunPhase,
    pub reason: Option<FinishReason>,
    /// Index of the endpoint being driven (or about to be).
    pub current_index: Option<usize>,
    pub total: usize,
    pub succeeded: usize,
    /// `Failed` and `Timeout` terminals.
    pub failed: usize,
    pub skipped: usize,
    pub results: Vec<EndpointResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for RunSnapshot {
    fn default() -> Self {
        Self {
            run_id: None,
            phase: RunPhase::Idle,
            reason: None,
            current_index: None,
            total: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            results: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }
}

impl RunSnapshot {
    pub fn finished_count(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    /// Fraction of endpoints with a terminal result, 0.0..=1.0.
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.finished_count() as f64 / self.total as f64
    }

    pub(crate) fn record_terminal(&mut self, status: Status) {
        match status {
            Status::Completed => self.succeeded += 1,
            Status::Failed | Status::Timeout => self.failed += 1,
            Status::Skipped => self.skipped += 1,
            _ => {}
        }
    }
}
