//! Progress sinks: where status changes and run lifecycle events go.

use super::model::{EndpointResult, FinishReason};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Receiver of run progress.
///
/// Called from the run loop; implementations must hand events off
/// without blocking.
pub trait ProgressSink: Send + Sync {
    fn on_run_started(&self, _run_id: Uuid, _total: usize) {}

    /// Called on every status transition with a copy of the result.
    fn on_status_changed(&self, result: EndpointResult);

    fn on_run_finished(&self, reason: FinishReason);
}

/// Event form of the [`ProgressSink`] callbacks.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    RunStarted { run_id: Uuid, total: usize },
    StatusChanged(EndpointResult),
    RunFinished(FinishReason),
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            debug!("Progress receiver dropped, event discarded");
        }
    }
}

impl ProgressSink for ChannelSink {
    fn on_run_started(&self, run_id: Uuid, total: usize) {
        self.send(ProgressEvent::RunStarted { run_id, total });
    }

    fn on_status_changed(&self, result: EndpointResult) {
        self.send(ProgressEvent::StatusChanged(result));
    }

    fn on_run_finished(&self, reason: FinishReason) {
        self.send(ProgressEvent::RunFinished(reason));
    }
}

/// Writes every event to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn on_run_started(&self, run_id: Uuid, total: usize) {
        info!(%run_id, total, "Run started");
    }

    fn on_status_changed(&self, result: EndpointResult) {
        info!(
            hostname = %result.endpoint.hostname,
            status = %result.status_label(),
            ping_ms = ?result.ping_ms,
            download_mbps = ?result.download_mbps,
            upload_mbps = ?result.upload_mbps,
            "Endpoint status"
        );
    }

    fn on_run_finished(&self, reason: FinishReason) {
        info!(%reason, "Run finished");
    }
}

/// Delivers each event to several sinks in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn ProgressSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn ProgressSink>) {
        self.sinks.push(sink);
    }
}

impl ProgressSink for FanoutSink {
    fn on_run_started(&self, run_id: Uuid, total: usize) {
        for sink in &self.sinks {
            sink.on_run_started(run_id, total);
        }
    }

    fn on_status_changed(&self, result: EndpointResult) {
        for sink in &self.sinks {
            sink.on_status_changed(result.clone());
        }
    }

    fn on_run_finished(&self, reason: FinishReason) {
        for sink in &self.sinks {
            sink.on_run_finished(reason);
        }
    }
}
