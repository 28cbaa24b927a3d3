//! Scripted collaborators and helpers shared by the engine tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

use relaybench::control::ConnectionController;
use relaybench::engine::{EndpointResult, FinishReason, ProgressEvent, RunConfig, Status};
use relaybench::probe::{SpeedProbe, Throughput};
use relaybench::relay::Endpoint;

/// Bound on every wait in the tests.
pub const DEADLINE: Duration = Duration::from_secs(5);

/// Millisecond-scale timings so scenarios run fast on a real clock.
pub fn fast_config() -> RunConfig {
    RunConfig {
        connect_timeout: Duration::from_millis(200),
        retry_count: 1,
        verify_timeout: Duration::from_millis(200),
        verify_poll_interval: Duration::from_millis(10),
        ping_count: 3,
        ping_timeout: Duration::from_millis(500),
        speed_test_enabled: true,
        speed_test_timeout: Duration::from_millis(500),
        disconnect_timeout: Duration::from_millis(200),
        inter_endpoint_delay: Duration::from_millis(5),
        stop_grace_period: Duration::from_millis(50),
    }
}

pub fn endpoint(hostname: &str) -> Endpoint {
    Endpoint::new(hostname, "se", "got")
}

pub fn endpoints(hostnames: &[&str]) -> Vec<Endpoint> {
    hostnames.iter().map(|h| endpoint(h)).collect()
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// In-memory VPN controller with per-host scripted misbehaviour.
#[derive(Default)]
pub struct FakeController {
    connected: Mutex<Option<String>>,
    /// Remaining failing connect attempts per host.
    connect_failures: Mutex<HashMap<String, u32>>,
    /// Hosts whose connect succeeds but never shows up in status.
    never_up: Mutex<HashSet<String>>,
    /// Hosts for which status names a different relay.
    impostors: Mutex<HashMap<String, String>>,
    connect_delay: Mutex<Duration>,
    disconnect_fails: Mutex<bool>,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub status_polls: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl FakeController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_connects(self, hostname: &str, attempts: u32) -> Self {
        self.connect_failures
            .lock()
            .unwrap()
            .insert(hostname.to_string(), attempts);
        self
    }

    pub fn never_up(self, hostname: &str) -> Self {
        self.never_up.lock().unwrap().insert(hostname.to_string());
        self
    }

    pub fn report_instead(self, hostname: &str, other: &str) -> Self {
        self.impostors
            .lock()
            .unwrap()
            .insert(hostname.to_string(), other.to_string());
        self
    }

    pub fn connect_delay(self, delay: Duration) -> Self {
        *self.connect_delay.lock().unwrap() = delay;
        self
    }

    pub fn failing_disconnect(self) -> Self {
        *self.disconnect_fails.lock().unwrap() = true;
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// `connect:<host>` / `disconnect` in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConnectionController for FakeController {
    async fn connect(&self, endpoint: &Endpoint) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap()
            .push(format!("connect:{}", endpoint.hostname));

        let delay = *self.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        {
            let mut failures = self.connect_failures.lock().unwrap();
            if let Some(left) = failures.get_mut(&endpoint.hostname) {
                if *left > 0 {
                    *left -= 1;
                    return Err(anyhow!("connection refused by daemon"));
                }
            }
        }

        let reported = if self.never_up.lock().unwrap().contains(&endpoint.hostname) {
            None
        } else {
            Some(
                self.impostors
                    .lock()
                    .unwrap()
                    .get(&endpoint.hostname)
                    .cloned()
                    .unwrap_or_else(|| endpoint.hostname.clone()),
            )
        };
        *self.connected.lock().unwrap() = reported;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push("disconnect".to_string());
        *self.connected.lock().unwrap() = None;
        if *self.disconnect_fails.lock().unwrap() {
            return Err(anyhow!("daemon not responding"));
        }
        Ok(())
    }

    async fn status(&self) -> Result<Option<String>> {
        self.status_polls.fetch_add(1, Ordering::SeqCst);
        Ok(self.connected.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// Probe
// ---------------------------------------------------------------------------

/// Probe returning fixed numbers, with optional per-call delays and failures.
pub struct FakeProbe {
    pub latency_ms: f64,
    pub throughput: Throughput,
    /// Delay for the n-th ping call; missing entries mean no delay.
    ping_delays: Mutex<VecDeque<Duration>>,
    measure_delay: Mutex<Duration>,
    ping_fails: Mutex<bool>,
    measure_fails: Mutex<bool>,
    pub pings: AtomicUsize,
    pub measures: AtomicUsize,
}

impl Default for FakeProbe {
    fn default() -> Self {
        Self {
            latency_ms: 23.5,
            throughput: Throughput {
                download_mbps: 480.0,
                upload_mbps: 95.0,
            },
            ping_delays: Mutex::new(VecDeque::new()),
            measure_delay: Mutex::new(Duration::ZERO),
            ping_fails: Mutex::new(false),
            measure_fails: Mutex::new(false),
            pings: AtomicUsize::new(0),
            measures: AtomicUsize::new(0),
        }
    }
}

impl FakeProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ping_delays(self, delays: &[Duration]) -> Self {
        self.ping_delays.lock().unwrap().extend(delays.iter().copied());
        self
    }

    pub fn measure_delay(self, delay: Duration) -> Self {
        *self.measure_delay.lock().unwrap() = delay;
        self
    }

    pub fn failing_ping(self) -> Self {
        *self.ping_fails.lock().unwrap() = true;
        self
    }

    pub fn failing_measure(self) -> Self {
        *self.measure_fails.lock().unwrap() = true;
        self
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn measures(&self) -> usize {
        self.measures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeedProbe for FakeProbe {
    async fn ping(&self, count: u32) -> Result<f64> {
        assert!(count > 0);
        self.pings.fetch_add(1, Ordering::SeqCst);
        let delay = self.ping_delays.lock().unwrap().pop_front().unwrap_or_default();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if *self.ping_fails.lock().unwrap() {
            return Err(anyhow!("100% packet loss"));
        }
        Ok(self.latency_ms)
    }

    async fn measure(&self) -> Result<Throughput> {
        self.measures.fetch_add(1, Ordering::SeqCst);
        let delay = *self.measure_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if *self.measure_fails.lock().unwrap() {
            return Err(anyhow!("speedtest: no servers reachable"));
        }
        Ok(self.throughput)
    }
}

// ---------------------------------------------------------------------------
// Event helpers
// ---------------------------------------------------------------------------

/// Statuses reported for `hostname`, in order.
pub fn statuses_for(events: &[ProgressEvent], hostname: &str) -> Vec<Status> {
    events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::StatusChanged(r) if r.hostname() == hostname => Some(r.status),
            _ => None,
        })
        .collect()
}

/// Drain events until `RunFinished`, failing the test after [`DEADLINE`].
pub async fn until_finished(rx: &mut UnboundedReceiver<ProgressEvent>) -> (Vec<ProgressEvent>, FinishReason) {
    let mut events = Vec::new();
    let reason = tokio::time::timeout(DEADLINE, async {
        loop {
            match rx.recv().await {
                Some(ProgressEvent::RunFinished(reason)) => return reason,
                Some(event) => events.push(event),
                None => panic!("progress channel closed before RunFinished"),
            }
        }
    })
    .await
    .expect("run did not finish in time");
    (events, reason)
}

/// Drain events until `hostname` reports `status`.
pub async fn until_status(
    rx: &mut UnboundedReceiver<ProgressEvent>,
    hostname: &str,
    status: Status,
) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    tokio::time::timeout(DEADLINE, async {
        loop {
            match rx.recv().await {
                Some(ProgressEvent::StatusChanged(r)) if r.hostname() == hostname && r.status == status => {
                    events.push(ProgressEvent::StatusChanged(r));
                    return;
                }
                Some(event) => events.push(event),
                None => panic!("progress channel closed before {} reached {}", hostname, status),
            }
        }
    })
    .await
    .expect("status not reached in time");
    events
}

pub fn transition_statuses(result: &EndpointResult) -> Vec<Status> {
    result.transitions.iter().map(|t| t.status).collect()
}
