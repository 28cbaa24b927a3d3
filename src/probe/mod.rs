//! Measurement probes run through an established tunnel.

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub mod ookla;
pub mod ping;

pub use ookla::OoklaSpeedtest;
pub use ping::PingProbe;

/// Download/upload throughput from one measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Throughput {
    pub download_mbps: f64,
    pub upload_mbps: f64,
}

/// Trait for the external latency + throughput tooling.
#[async_trait::async_trait]
pub trait SpeedProbe: Send + Sync {
    /// Send `count` echo requests and return the average latency in ms.
    async fn ping(&self, count: u32) -> Result<f64>;

    /// Run a full download/upload measurement.
    async fn measure(&self) -> Result<Throughput>;

    /// Check if the underlying tools are installed.
    async fn is_available(&self) -> bool {
        true
    }
}

/// System `ping` for latency, Ookla `speedtest` for throughput.
#[derive(Debug, Clone, Default)]
pub struct CliSpeedProbe {
    pub ping: PingProbe,
    pub speedtest: OoklaSpeedtest,
}

impl CliSpeedProbe {
    pub fn new(ping: PingProbe, speedtest: OoklaSpeedtest) -> Self {
        Self { ping, speedtest }
    }
}

#[async_trait::async_trait]
impl SpeedProbe for CliSpeedProbe {
    async fn ping(&self, count: u32) -> Result<f64> {
        self.ping.run(count).await
    }

    async fn measure(&self) -> Result<Throughput> {
        self.speedtest.run().await
    }

    async fn is_available(&self) -> bool {
        self.ping.is_available().await && self.speedtest.is_available().await
    }
}
