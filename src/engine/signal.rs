//! Pause/cancel signal shared between control callers and the run loop.

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// The only run state written from outside the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Running,
    PauseRequested,
    CancelRequested,
}

/// Tri-state control flag plus a cancellation token for in-flight steps.
///
/// Cancellation is sticky: once requested, pause/resume become no-ops.
#[derive(Debug)]
pub struct RunControl {
    state: watch::Sender<ControlState>,
    cancel: CancellationToken,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ControlState::Running);
        Self {
            state,
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> ControlState {
        *self.state.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns true if this call changed the state.
    pub fn pause(&self) -> bool {
        self.state.send_if_modified(|s| {
            if *s == ControlState::Running {
                *s = ControlState::PauseRequested;
                true
            } else {
                false
            }
        })
    }

    /// Returns true if this call changed the state.
    pub fn resume(&self) -> bool {
        self.state.send_if_modified(|s| {
            if *s == ControlState::PauseRequested {
                *s = ControlState::Running;
                true
            } else {
                false
            }
        })
    }

    /// Returns true if this call changed the state.
    pub fn cancel(&self) -> bool {
        let changed = self.state.send_if_modified(|s| {
            if *s != ControlState::CancelRequested {
                *s = ControlState::CancelRequested;
                true
            } else {
                false
            }
        });
        self.cancel.cancel();
        changed
    }

    /// Token handed to in-flight steps.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait until the state is no longer `PauseRequested`.
    /// Returns false if the run was cancelled.
    pub async fn wait_while_paused(&self) -> bool {
        let mut rx = self.state.subscribe();
        let resumed = match rx.wait_for(|s| *s != ControlState::PauseRequested).await {
            Ok(state) => *state != ControlState::CancelRequested,
            Err(_) => false,
        };
        resumed
    }

    /// Sleep for `delay`, cut short by cancellation. Returns false if cancelled.
    pub async fn sleep(&self, delay: std::time::Duration) -> bool {
        if delay.is_zero() {
            return !self.is_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => !self.is_cancelled(),
        }
    }
}
