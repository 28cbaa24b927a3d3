//! Run lifecycle: start, pause/resume/stop, snapshots and the final cleanup.

use super::model::{EndpointResult, FailureCause, FinishReason, RunPhase, RunSnapshot, Status};
use super::run_config::RunConfig;
use super::runner::EndpointRunner;
use super::signal::{ControlState, RunControl};
use super::sink::{LogSink, ProgressSink};
use crate::control::ConnectionController;
use crate::error::EngineError;
use crate::probe::SpeedProbe;
use crate::relay::Endpoint;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Runs a list of endpoints one after another through [`EndpointRunner`].
///
/// Control methods only flip the shared [`RunControl`]; the run task owns
/// every other piece of state and publishes it through a watch channel,
/// so [`TestOrchestrator::status`] never waits on an in-flight step.
pub struct TestOrchestrator {
    config: Arc<RunConfig>,
    controller: Arc<dyn ConnectionController>,
    runner: EndpointRunner,
    busy: Arc<AtomicBool>,
    control: Mutex<Option<Arc<RunControl>>>,
    snapshot: Arc<watch::Sender<RunSnapshot>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TestOrchestrator {
    /// Build an orchestrator. The configuration is validated here, once.
    pub fn new(
        config: RunConfig,
        controller: Arc<dyn ConnectionController>,
        probe: Arc<dyn SpeedProbe>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let config = Arc::new(config);
        let runner = EndpointRunner::new(controller.clone(), probe, config.clone());
        let (snapshot, _) = watch::channel(RunSnapshot::default());

        Ok(Self {
            config,
            controller,
            runner,
            busy: Arc::new(AtomicBool::new(false)),
            control: Mutex::new(None),
            snapshot: Arc::new(snapshot),
            task: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Start a run over `endpoints` in the given order.
    ///
    /// Returns as soon as the run task is spawned. Progress goes to `sink`,
    /// finishing with exactly one `on_run_finished`.
    pub fn start(&self, endpoints: Vec<Endpoint>, sink: Arc<dyn ProgressSink>) -> Result<Uuid, EngineError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        let mut seen = HashSet::new();
        for endpoint in &endpoints {
            if !seen.insert(endpoint.hostname.to_ascii_lowercase()) {
                return Err(EngineError::DuplicateEndpoint(endpoint.hostname.clone()));
            }
        }

        // Hold the control slot while claiming the run so a concurrent
        // stop() that sees `busy` always reaches this run's control.
        let control = Arc::new(RunControl::new());
        {
            let mut slot = lock(&self.control);
            if self
                .busy
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return Err(EngineError::AlreadyRunning);
            }
            *slot = Some(control.clone());
        }

        let run_id = Uuid::new_v4();

        let total = endpoints.len();
        self.snapshot.send_replace(RunSnapshot {
            run_id: Some(run_id),
            phase: RunPhase::Running,
            total,
            results: endpoints.iter().cloned().map(EndpointResult::new).collect(),
            started_at: Some(chrono::Utc::now()),
            ..Default::default()
        });

        let run = Run {
            run_id,
            endpoints,
            runner: self.runner.clone(),
            config: self.config.clone(),
            controller: self.controller.clone(),
            control,
            snapshot: self.snapshot.clone(),
            busy: self.busy.clone(),
            sink,
        };

        info!(%run_id, total, "Starting test run");
        let task = handle.spawn(run.supervise().instrument(info_span!("run", %run_id)));
        *lock(&self.task) = Some(task);
        Ok(run_id)
    }

    /// Suspend before the next endpoint. No effect unless running.
    pub fn pause(&self) {
        if let Some(control) = self.active_control() {
            if control.pause() {
                info!("Pause requested");
            }
        }
    }

    /// No effect unless paused.
    pub fn resume(&self) {
        if let Some(control) = self.active_control() {
            if control.resume() {
                info!("Resume requested");
            }
        }
    }

    /// Request a stop. Idempotent; the in-flight step gets the grace period.
    pub fn stop(&self) {
        if let Some(control) = self.active_control() {
            if control.cancel() {
                info!("Stop requested");
            }
        }
    }

    /// Latest published run state. Safe to call at any time.
    pub fn status(&self) -> RunSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that sees every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<RunSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Wait for the current run task, if any, to finish.
    pub async fn join(&self) {
        let task = lock(&self.task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Run task ended abnormally");
            }
        }
    }

    /// Connect to one endpoint outside of a run and leave the tunnel up.
    ///
    /// Uses the same connect retries and verification as a run. On failure
    /// a best-effort disconnect is issued before the error is returned.
    pub async fn connect_now(&self, endpoint: &Endpoint) -> Result<(), EngineError> {
        let _busy = {
            let mut slot = lock(&self.control);
            if self
                .busy
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return Err(EngineError::AlreadyRunning);
            }
            *slot = None;
            BusyGuard(&self.busy)
        };

        let span = info_span!("connect_now", hostname = %endpoint.hostname);
        async {
            let mut result = EndpointResult::new(endpoint.clone());
            let never = CancellationToken::new();
            if self.runner.establish(&mut result, &LogSink, &never).await {
                info!("Connected");
                return Ok(());
            }

            best_effort_disconnect(self.controller.as_ref(), &self.config).await;
            Err(EngineError::ConnectNow {
                hostname: endpoint.hostname.clone(),
                cause: result.cause.unwrap_or(FailureCause::Connect),
                detail: result.error.unwrap_or_else(|| result.status.to_string()),
            })
        }
        .instrument(span)
        .await
    }

    fn active_control(&self) -> Option<Arc<RunControl>> {
        if !self.is_running() {
            debug!("No active run, control request ignored");
            return None;
        }
        lock(&self.control).clone()
    }
}

/// Everything the run task owns.
struct Run {
    run_id: Uuid,
    endpoints: Vec<Endpoint>,
    runner: EndpointRunner,
    config: Arc<RunConfig>,
    controller: Arc<dyn ConnectionController>,
    control: Arc<RunControl>,
    snapshot: Arc<watch::Sender<RunSnapshot>>,
    busy: Arc<AtomicBool>,
    sink: Arc<dyn ProgressSink>,
}

impl Run {
    /// Drive the loop on its own task so a panic still ends in cleanup
    /// and a `Failed` finish.
    async fn supervise(self) {
        self.sink.on_run_started(self.run_id, self.endpoints.len());
        let pending = self.snapshot.borrow().results.clone();
        for result in pending {
            self.sink.on_status_changed(result);
        }

        let looped = tokio::spawn(
            run_loop(
                self.endpoints.clone(),
                self.runner.clone(),
                self.config.clone(),
                self.control.clone(),
                self.snapshot.clone(),
                self.sink.clone(),
            )
            .in_current_span(),
        );

        let reason = match looped.await {
            Ok(reason) => reason,
            Err(e) => {
                error!(error = %e, "Run loop died");
                self.fail_interrupted(&e.to_string());
                FinishReason::Failed
            }
        };

        best_effort_disconnect(self.controller.as_ref(), &self.config).await;

        self.snapshot.send_modify(|s| {
            s.phase = RunPhase::Finished;
            s.reason = Some(reason);
            s.finished_at = Some(chrono::Utc::now());
        });
        {
            let s = self.snapshot.borrow();
            info!(%reason, succeeded = s.succeeded, failed = s.failed, skipped = s.skipped, "Run finished");
        }

        self.busy.store(false, Ordering::Release);
        self.sink.on_run_finished(reason);
    }

    /// Fail the endpoint that was in flight when the loop died.
    fn fail_interrupted(&self, detail: &str) {
        let mut failed = None;
        self.snapshot.send_modify(|s| {
            let Some(slot) = s.current_index.and_then(|i| s.results.get_mut(i)) else {
                return;
            };
            let cause = match slot.status {
                Status::Verifying => FailureCause::Verify,
                Status::Pinging => FailureCause::Ping,
                Status::SpeedTesting => FailureCause::SpeedTest,
                _ => FailureCause::Connect,
            };
            if !slot.is_terminal() && slot.fail(Status::Failed, cause, detail) {
                failed = Some(slot.clone());
                s.record_terminal(Status::Failed);
            }
        });
        if let Some(result) = failed {
            self.sink.on_status_changed(result);
        }
    }
}

async fn run_loop(
    endpoints: Vec<Endpoint>,
    runner: EndpointRunner,
    config: Arc<RunConfig>,
    control: Arc<RunControl>,
    snapshot: Arc<watch::Sender<RunSnapshot>>,
    sink: Arc<dyn ProgressSink>,
) -> FinishReason {
    let total = endpoints.len();

    for (index, endpoint) in endpoints.into_iter().enumerate() {
        if control.is_cancelled() || !hold_while_paused(&control, &snapshot).await {
            return stopping(&snapshot);
        }
        if index > 0 && !control.sleep(config.inter_endpoint_delay).await {
            return stopping(&snapshot);
        }
        // A pause requested during the delay takes effect before the next endpoint.
        if !hold_while_paused(&control, &snapshot).await {
            return stopping(&snapshot);
        }

        snapshot.send_modify(|s| s.current_index = Some(index));
        info!(index, total, hostname = %endpoint.hostname, "Testing endpoint");

        let progress = SnapshotSink {
            index,
            snapshot: &snapshot,
            inner: sink.as_ref(),
        };
        let result = runner.run(endpoint, &progress, &control.token()).await;

        snapshot.send_modify(|s| {
            s.record_terminal(result.status);
            if let Some(slot) = s.results.get_mut(index) {
                *slot = result;
            }
        });
    }

    if control.is_cancelled() {
        return stopping(&snapshot);
    }
    FinishReason::Completed
}

/// Returns false if the run was stopped instead of resumed.
async fn hold_while_paused(control: &RunControl, snapshot: &watch::Sender<RunSnapshot>) -> bool {
    match control.state() {
        ControlState::Running => true,
        ControlState::CancelRequested => false,
        ControlState::PauseRequested => {
            snapshot.send_modify(|s| s.phase = RunPhase::Paused);
            info!("Run paused");
            let resumed = control.wait_while_paused().await;
            if resumed {
                snapshot.send_modify(|s| s.phase = RunPhase::Running);
                info!("Run resumed");
            }
            resumed
        }
    }
}

fn stopping(snapshot: &watch::Sender<RunSnapshot>) -> FinishReason {
    snapshot.send_modify(|s| s.phase = RunPhase::Stopping);
    info!("Run stopping");
    FinishReason::StoppedByUser
}

/// Disconnect and only log failures.
async fn best_effort_disconnect(controller: &dyn ConnectionController, config: &RunConfig) {
    match tokio::time::timeout(config.disconnect_timeout, controller.disconnect()).await {
        Ok(Ok(())) => debug!("Cleanup disconnect done"),
        Ok(Err(e)) => warn!(error = %format!("{:#}", e), "Cleanup disconnect failed"),
        Err(_) => warn!(timeout = ?config.disconnect_timeout, "Cleanup disconnect timed out"),
    }
}

/// Mirrors each status change into the snapshot before forwarding it.
struct SnapshotSink<'a> {
    index: usize,
    snapshot: &'a watch::Sender<RunSnapshot>,
    inner: &'a dyn ProgressSink,
}

impl ProgressSink for SnapshotSink<'_> {
    fn on_status_changed(&self, result: EndpointResult) {
        self.snapshot.send_modify(|s| {
            if let Some(slot) = s.results.get_mut(self.index) {
                *slot = result.clone();
            }
        });
        self.inner.on_status_changed(result);
    }

    fn on_run_finished(&self, reason: FinishReason) {
        self.inner.on_run_finished(reason);
    }
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A poisoned lock only means a panic elsewhere; the data is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
