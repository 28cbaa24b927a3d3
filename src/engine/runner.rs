//! Per-endpoint protocol: connect -> verify -> ping -> speed test -> disconnect.

use super::model::{EndpointResult, FailureCause, Status};
use super::run_config::RunConfig;
use super::sink::ProgressSink;
use crate::control::ConnectionController;
use crate::error::StepError;
use crate::probe::SpeedProbe;
use crate::relay::Endpoint;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// How a guarded collaborator call ended.
#[derive(Debug)]
enum StepOutcome<T> {
    Done(T),
    TimedOut,
    /// Stop was requested and the call did not finish within the grace period.
    Abandoned,
}

/// Drives exactly one endpoint through the fixed protocol.
///
/// Stateless between calls; the orchestrator runs one endpoint at a time.
#[derive(Clone)]
pub struct EndpointRunner {
    controller: Arc<dyn ConnectionController>,
    probe: Arc<dyn SpeedProbe>,
    config: Arc<RunConfig>,
}

impl EndpointRunner {
    pub fn new(
        controller: Arc<dyn ConnectionController>,
        probe: Arc<dyn SpeedProbe>,
        config: Arc<RunConfig>,
    ) -> Self {
        Self {
            controller,
            probe,
            config,
        }
    }

    /// Run the protocol for `endpoint` and return its terminal result.
    ///
    /// Step failures end up in the result, never as an error. Disconnect is
    /// attempted exactly once, whatever happened before it.
    pub async fn run(
        &self,
        endpoint: Endpoint,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> EndpointResult {
        let span = info_span!("endpoint", hostname = %endpoint.hostname);
        async move {
            let mut result = EndpointResult::new(endpoint);

            self.drive(&mut result, sink, cancel).await;
            self.release(&mut result, sink).await;

            info!(status = %result.status_label(), "Endpoint finished");
            result
        }
        .instrument(span)
        .await
    }

    /// Connect and verify only, leaving the tunnel up on success.
    /// On failure `result` holds the terminal status; nothing is disconnected.
    pub(crate) async fn establish(
        &self,
        result: &mut EndpointResult,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> bool {
        self.connect(result, sink, cancel).await && self.verify(result, sink, cancel).await
    }

    /// Steps 1-4. Always leaves `result` in a terminal status.
    async fn drive(&self, result: &mut EndpointResult, sink: &dyn ProgressSink, cancel: &CancellationToken) {
        if !self.connect(result, sink, cancel).await {
            return;
        }
        if !self.verify(result, sink, cancel).await {
            return;
        }
        if !self.ping(result, sink, cancel).await {
            return;
        }
        if self.config.speed_test_enabled {
            self.speed_test(result, sink, cancel).await;
        } else {
            self.enter(result, Status::Completed, sink);
        }
    }

    /// Connect with retries. Returns true if the next step should run.
    async fn connect(&self, result: &mut EndpointResult, sink: &dyn ProgressSink, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            self.stopped(result, sink);
            return false;
        }
        self.enter(result, Status::Connecting, sink);

        let attempts = self.config.retry_count.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                self.stopped(result, sink);
                return false;
            }
            result.connect_attempts = attempt;
            debug!(attempt, attempts, "Connecting");

            let call = self.controller.connect(&result.endpoint);
            match self.guarded(call, self.config.connect_timeout, cancel).await {
                StepOutcome::Done(Ok(())) => {
                    info!(attempt, "Connect issued");
                    return self.proceed(result, sink, cancel);
                }
                StepOutcome::Done(Err(e)) => {
                    warn!(attempt, error = %format!("{:#}", e), "Connect attempt failed");
                    last_error = format!("{:#}", e);
                }
                StepOutcome::TimedOut => {
                    warn!(attempt, timeout = ?self.config.connect_timeout, "Connect attempt timed out");
                    last_error = format!("timed out after {:?}", self.config.connect_timeout);
                }
                StepOutcome::Abandoned => {
                    self.stopped(result, sink);
                    return false;
                }
            }
        }

        let err = StepError::Connect {
            hostname: result.endpoint.hostname.clone(),
            attempts,
            reason: last_error,
        };
        self.failed(result, Status::Failed, FailureCause::Connect, err, sink);
        false
    }

    /// Poll status until the controller reports this endpoint.
    async fn verify(&self, result: &mut EndpointResult, sink: &dyn ProgressSink, cancel: &CancellationToken) -> bool {
        self.enter(result, Status::Verifying, sink);

        let hostname = result.endpoint.hostname.clone();
        let poll = self.poll_until_connected(&hostname);

        match self.guarded(poll, self.config.verify_timeout, cancel).await {
            StepOutcome::Done(Ok(())) => {
                info!("Connection verified");
                self.proceed(result, sink, cancel)
            }
            StepOutcome::Done(Err(err)) => {
                self.failed(result, Status::Failed, FailureCause::VerifyMismatch, err, sink);
                false
            }
            StepOutcome::TimedOut => {
                let err = StepError::VerifyTimeout {
                    hostname: hostname.clone(),
                    timeout: self.config.verify_timeout,
                };
                self.failed(result, Status::Timeout, FailureCause::Verify, err, sink);
                false
            }
            StepOutcome::Abandoned => {
                self.stopped(result, sink);
                false
            }
        }
    }

    /// Unbounded on its own; the caller wraps it in the verify timeout.
    fn poll_until_connected<'a>(&'a self, hostname: &'a str) -> impl Future<Output = Result<(), StepError>> + 'a {
        async move {
            loop {
                match self.controller.status().await {
                    Ok(Some(connected)) if connected.eq_ignore_ascii_case(hostname) => return Ok(()),
                    Ok(Some(connected)) => {
                        return Err(StepError::VerifyMismatch {
                            expected: hostname.to_string(),
                            actual: connected,
                        })
                    }
                    Ok(None) => debug!("Not connected yet"),
                    Err(e) => warn!(error = %format!("{:#}", e), "Status poll failed"),
                }
                tokio::time::sleep(self.config.verify_poll_interval).await;
            }
        }
    }

    async fn ping(&self, result: &mut EndpointResult, sink: &dyn ProgressSink, cancel: &CancellationToken) -> bool {
        self.enter(result, Status::Pinging, sink);

        let call = self.probe.ping(self.config.ping_count);
        match self.guarded(call, self.config.ping_timeout, cancel).await {
            StepOutcome::Done(Ok(latency_ms)) => {
                info!(latency_ms, "Ping finished");
                result.ping_ms = Some(latency_ms);
                if !self.config.speed_test_enabled {
                    // Ping was the last step: its success stands even under stop.
                    return true;
                }
                self.proceed(result, sink, cancel)
            }
            StepOutcome::Done(Err(e)) => {
                let err = StepError::Ping(format!("{:#}", e));
                self.failed(result, Status::Failed, FailureCause::Ping, err, sink);
                false
            }
            StepOutcome::TimedOut => {
                let err = StepError::Ping(format!("timed out after {:?}", self.config.ping_timeout));
                self.failed(result, Status::Failed, FailureCause::Ping, err, sink);
                false
            }
            StepOutcome::Abandoned => {
                self.stopped(result, sink);
                false
            }
        }
    }

    /// Failure keeps the ping already recorded.
    async fn speed_test(&self, result: &mut EndpointResult, sink: &dyn ProgressSink, cancel: &CancellationToken) {
        self.enter(result, Status::SpeedTesting, sink);

        let call = self.probe.measure();
        match self.guarded(call, self.config.speed_test_timeout, cancel).await {
            StepOutcome::Done(Ok(throughput)) => {
                result.download_mbps = Some(throughput.download_mbps);
                result.upload_mbps = Some(throughput.upload_mbps);
                self.enter(result, Status::Completed, sink);
            }
            StepOutcome::Done(Err(e)) => {
                let err = StepError::SpeedTest(format!("{:#}", e));
                self.failed(result, Status::Failed, FailureCause::SpeedTest, err, sink);
            }
            StepOutcome::TimedOut => {
                let err = StepError::SpeedTest(format!("timed out after {:?}", self.config.speed_test_timeout));
                self.failed(result, Status::Failed, FailureCause::SpeedTest, err, sink);
            }
            StepOutcome::Abandoned => self.stopped(result, sink),
        }
    }

    /// Step 5. Runs on every exit path; failures only annotate the result.
    async fn release(&self, result: &mut EndpointResult, sink: &dyn ProgressSink) {
        let err = match tokio::time::timeout(self.config.disconnect_timeout, self.controller.disconnect()).await {
            Ok(Ok(())) => {
                debug!("Disconnected");
                return;
            }
            Ok(Err(e)) => StepError::Disconnect(format!("{:#}", e)),
            Err(_) => StepError::Disconnect(format!("timed out after {:?}", self.config.disconnect_timeout)),
        };
        warn!(error = %err, "Disconnect failed, keeping status");
        result.disconnect_error = Some(err.to_string());
        sink.on_status_changed(result.clone());
    }

    /// Run `fut` bounded by `timeout`; after a stop request it gets the
    /// configured grace period to finish before being dropped.
    async fn guarded<T, F>(&self, fut: F, timeout: Duration, cancel: &CancellationToken) -> StepOutcome<T>
    where
        F: Future<Output = T>,
    {
        let bounded = tokio::time::timeout(timeout, fut);
        tokio::pin!(bounded);

        tokio::select! {
            biased;
            res = &mut bounded => match res {
                Ok(value) => StepOutcome::Done(value),
                Err(_) => StepOutcome::TimedOut,
            },
            _ = cancel.cancelled() => {
                debug!(grace = ?self.config.stop_grace_period, "Stop requested during step, waiting for grace period");
                match tokio::time::timeout(self.config.stop_grace_period, &mut bounded).await {
                    Ok(Ok(value)) => StepOutcome::Done(value),
                    Ok(Err(_)) => StepOutcome::TimedOut,
                    Err(_) => StepOutcome::Abandoned,
                }
            }
        }
    }

    /// After a successful non-final step: continue unless stop was requested.
    fn proceed(&self, result: &mut EndpointResult, sink: &dyn ProgressSink, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            self.stopped(result, sink);
            return false;
        }
        true
    }

    fn enter(&self, result: &mut EndpointResult, status: Status, sink: &dyn ProgressSink) {
        if result.advance(status) {
            debug!(%status, "Step entered");
            sink.on_status_changed(result.clone());
        }
    }

    fn failed(
        &self,
        result: &mut EndpointResult,
        status: Status,
        cause: FailureCause,
        err: StepError,
        sink: &dyn ProgressSink,
    ) {
        warn!(%status, %cause, error = %err, "Step failed");
        if result.fail(status, cause, err.to_string()) {
            sink.on_status_changed(result.clone());
        }
    }

    fn stopped(&self, result: &mut EndpointResult, sink: &dyn ProgressSink) {
        info!(status = %result.status, "Endpoint stopped");
        if result.fail(Status::Skipped, FailureCause::Stopped, "stopped") {
            sink.on_status_changed(result.clone());
        }
    }
}
