//! System `ping` wrapper measuring average RTT through the tunnel.

use crate::error::ToolError;
use anyhow::Result;
use std::time::Duration;
use tracing::{debug, warn};

const TOOL: &str = "ping";

/// Pings a reference host; with the tunnel up, traffic rides the relay.
#[derive(Debug, Clone)]
pub struct PingProbe {
    binary: String,
    target: String,
    /// Per-reply wait handed to `ping` itself.
    reply_timeout: Duration,
}

impl Default for PingProbe {
    fn default() -> Self {
        Self {
            binary: TOOL.to_string(),
            target: "1.1.1.1".to_string(),
            reply_timeout: Duration::from_secs(5),
        }
    }
}

impl PingProbe {
    pub fn new(binary: impl Into<String>, target: impl Into<String>, reply_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            target: target.into(),
            reply_timeout,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    fn args(&self, count: u32) -> Vec<String> {
        let count = count.max(1).to_string();
        let secs = self.reply_timeout.as_secs().max(1);
        if cfg!(target_os = "windows") {
            vec![
                "-n".into(),
                count,
                "-w".into(),
                self.reply_timeout.as_millis().max(1).to_string(),
                self.target.clone(),
            ]
        } else if cfg!(target_os = "macos") {
            vec!["-c".into(), count, "-t".into(), secs.to_string(), self.target.clone()]
        } else {
            vec!["-c".into(), count, "-W".into(), secs.to_string(), self.target.clone()]
        }
    }

    /// Send `count` echo requests and return the average RTT in ms.
    pub async fn run(&self, count: u32) -> Result<f64> {
        let args = self.args(count);
        debug!(host = %self.target, ?args, "Executing ping");

        let output = tokio::process::Command::new(&self.binary)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ToolError::from_spawn(TOOL, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);

        if stdout.contains("100% packet loss") || stdout.contains("(100% loss)") {
            return Err(ToolError::Failed {
                tool: TOOL.to_string(),
                code: output.status.code().unwrap_or(-1),
                stderr: format!("no replies from {}", self.target),
            }
            .into());
        }

        if !output.status.success() {
            return Err(ToolError::Failed {
                tool: TOOL.to_string(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        extract_avg_rtt(&stdout).ok_or_else(|| {
            warn!(host = %self.target, "Ping succeeded but RTT could not be parsed");
            ToolError::Parse {
                tool: TOOL.to_string(),
                detail: "no average RTT in output".to_string(),
            }
            .into()
        })
    }

    pub async fn is_available(&self) -> bool {
        // `ping` has no portable --version; spawning with a bad flag proves it exists.
        tokio::process::Command::new(&self.binary)
            .arg("-V")
            .output()
            .await
            .is_ok()
    }
}

/// Pull the average RTT from ping's summary output.
pub fn extract_avg_rtt(output: &str) -> Option<f64> {
    for line in output.lines() {
        let line = line.trim();

        // rtt min/avg/max/mdev = 14.188/14.512/15.003/0.310 ms
        // round-trip min/avg/max/stddev = 14.188/14.512/15.003/0.310 ms
        if line.starts_with("rtt") || line.starts_with("round-trip") {
            if let Some((_, values)) = line.split_once(" = ") {
                let parts: Vec<&str> = values.split('/').collect();
                if parts.len() >= 2 {
                    return parts[1].trim().parse::<f64>().ok();
                }
            }
        }

        // Minimum = 13ms, Maximum = 16ms, Average = 14ms
        if let Some(pos) = line.find("Average = ") {
            let rest = &line[pos + "Average = ".len()..];
            let digits = rest.trim_end_matches("ms").trim();
            return digits.parse::<f64>().ok();
        }
    }

    // Single reply without a summary line: "time=12.3 ms"
    if let Some(pos) = output.find("time=") {
        let rest = &output[pos + 5..];
        let end = rest.find(|c: char| c == ' ' || c == 'm').unwrap_or(rest.len());
        return rest[..end].parse::<f64>().ok();
    }

    None
}
