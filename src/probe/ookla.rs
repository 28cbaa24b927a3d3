//! Ookla `speedtest` CLI wrapper -- spawn, parse JSON output.

use super::Throughput;
use crate::error::ToolError;
use anyhow::Result;
use serde::Deserialize;
use tracing::{debug, info};

const TOOL: &str = "speedtest";

/// Parsed `speedtest --format=json` result (subset of fields we care about).
#[derive(Debug, Deserialize)]
pub struct SpeedtestReport {
    pub ping: Option<SpeedtestPing>,
    pub download: SpeedtestTransfer,
    pub upload: SpeedtestTransfer,
    #[serde(rename = "packetLoss")]
    pub packet_loss: Option<f64>,
    pub isp: Option<String>,
    pub server: Option<SpeedtestServer>,
}

#[derive(Debug, Deserialize)]
pub struct SpeedtestPing {
    pub latency: f64,
    pub jitter: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct SpeedtestTransfer {
    /// Bytes per second.
    pub bandwidth: f64,
    pub bytes: Option<u64>,
    pub elapsed: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct SpeedtestServer {
    pub name: Option<String>,
    pub location: Option<String>,
}

impl SpeedtestReport {
    pub fn throughput(&self) -> Throughput {
        Throughput {
            download_mbps: bytes_per_sec_to_mbps(self.download.bandwidth),
            upload_mbps: bytes_per_sec_to_mbps(self.upload.bandwidth),
        }
    }
}

fn bytes_per_sec_to_mbps(bandwidth: f64) -> f64 {
    bandwidth * 8.0 / 1_000_000.0
}

/// Runs `speedtest --format=json --accept-license --accept-gdpr`.
#[derive(Debug, Clone)]
pub struct OoklaSpeedtest {
    binary: String,
}

impl Default for OoklaSpeedtest {
    fn default() -> Self {
        Self {
            binary: TOOL.to_string(),
        }
    }
}

impl OoklaSpeedtest {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub async fn run(&self) -> Result<Throughput> {
        debug!(binary = %self.binary, "Executing speedtest");
        let output = tokio::process::Command::new(&self.binary)
            .arg("--format=json")
            .arg("--accept-license")
            .arg("--accept-gdpr")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ToolError::from_spawn(TOOL, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() || stdout.contains("ERROR:") || stderr.contains("ERROR:") {
            let detail = if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() };
            return Err(ToolError::Failed {
                tool: TOOL.to_string(),
                code: output.status.code().unwrap_or(-1),
                stderr: detail.chars().take(500).collect(),
            }
            .into());
        }

        let report = parse_output(&stdout)?;
        let throughput = report.throughput();
        info!(
            download_mbps = throughput.download_mbps,
            upload_mbps = throughput.upload_mbps,
            server = ?report.server.as_ref().and_then(|s| s.name.as_deref()),
            "Speedtest finished"
        );
        Ok(throughput)
    }

    pub async fn is_available(&self) -> bool {
        match tokio::process::Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
        {
            Ok(out) => {
                let text = format!(
                    "{}{}",
                    String::from_utf8_lossy(&out.stdout),
                    String::from_utf8_lossy(&out.stderr)
                );
                text.contains("Ookla") || text.to_lowercase().contains("speedtest")
            }
            Err(_) => false,
        }
    }
}

/// Parse the JSON document printed by `speedtest --format=json`.
///
/// The CLI may print progress lines before the result; the last line that
/// looks like a JSON object is used.
pub fn parse_output(stdout: &str) -> Result<SpeedtestReport> {
    let json = stdout
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with('{') && l.ends_with('}'))
        .last()
        .unwrap_or(stdout.trim());

    serde_json::from_str(json).map_err(|e| {
        ToolError::Parse {
            tool: TOOL.to_string(),
            detail: e.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> &'static str {
        r#"{"type":"result","timestamp":"2024-05-01T10:00:00Z","ping":{"jitter":0.8,"latency":21.4},"download":{"bandwidth":12500000,"bytes":150000000,"elapsed":12000},"upload":{"bandwidth":2500000,"bytes":30000000,"elapsed":10000},"packetLoss":0,"isp":"Mullvad","server":{"id":1234,"name":"Bahnhof","location":"Stockholm"}}"#
    }

    #[test]
    fn test_parse_result_json() {
        let report = parse_output(fixture()).unwrap();
        let t = report.throughput();
        assert!((t.download_mbps - 100.0).abs() < 1e-9);
        assert!((t.upload_mbps - 20.0).abs() < 1e-9);
        assert_eq!(report.ping.as_ref().map(|p| p.latency), Some(21.4));
        assert_eq!(report.isp.as_deref(), Some("Mullvad"));
    }

    #[test]
    fn test_parse_with_leading_progress_lines() {
        let out = format!("{{\"type\":\"testStart\"}}\n{}\n", fixture());
        let report = parse_output(&out).unwrap();
        assert_eq!(report.server.and_then(|s| s.location).as_deref(), Some("Stockholm"));
    }

    #[test]
    fn test_parse_garbage_errors() {
        assert!(parse_output("not json").is_err());
        assert!(parse_output(r#"{"type":"result"}"#).is_err());
    }
}
