//! `mullvad` CLI wrapper -- relay selection, connect, disconnect, status.

use super::ConnectionController;
use crate::error::ToolError;
use crate::relay::{Endpoint, Protocol};
use anyhow::Result;
use std::time::Duration;
use tracing::{debug, info};

const TOOL: &str = "mullvad";

/// Drives the Mullvad daemon through its command-line client.
#[derive(Debug, Clone)]
pub struct MullvadCli {
    binary: String,
    /// Pause between `relay set location` and `connect` so the daemon applies it.
    settle_delay: Duration,
}

impl Default for MullvadCli {
    fn default() -> Self {
        Self {
            binary: TOOL.to_string(),
            settle_delay: Duration::from_secs(1),
        }
    }
}

impl MullvadCli {
    pub fn new(binary: impl Into<String>, settle_delay: Duration) -> Self {
        Self {
            binary: binary.into(),
            settle_delay,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let command = format!("{} {}", self.binary, args.join(" "));
        debug!(%command, "Running mullvad command");

        let output = tokio::process::Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ToolError::from_spawn(TOOL, e))?;

        if !output.status.success() {
            return Err(ToolError::Failed {
                tool: command,
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait::async_trait]
impl ConnectionController for MullvadCli {
    async fn connect(&self, endpoint: &Endpoint) -> Result<()> {
        if endpoint.country_code.is_empty() || endpoint.city_code.is_empty() {
            anyhow::bail!("missing country/city code for {}", endpoint.hostname);
        }

        // Bridges ride on OpenVPN; only the two tunnel types are settable.
        if let Some(protocol @ (Protocol::Wireguard | Protocol::Openvpn)) = endpoint.protocol {
            let protocol = protocol.to_string();
            self.run(&["relay", "set", "tunnel-protocol", &protocol]).await?;
        }

        self.run(&[
            "relay",
            "set",
            "location",
            &endpoint.country_code,
            &endpoint.city_code,
            &endpoint.hostname,
        ])
        .await?;

        tokio::time::sleep(self.settle_delay).await;

        self.run(&["connect"]).await?;
        info!(hostname = %endpoint.hostname, "Mullvad connect issued");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.run(&["disconnect"]).await?;
        Ok(())
    }

    async fn status(&self) -> Result<Option<String>> {
        let out = self.run(&["status"]).await?;
        parse_status(&out)
    }

    async fn is_available(&self) -> bool {
        match self.run(&["version"]).await {
            Ok(version) => {
                info!(%version, "Mullvad CLI available");
                true
            }
            Err(e) => {
                info!(error = %e, "Mullvad CLI unavailable");
                false
            }
        }
    }
}

/// Extract the connected relay's hostname from `mullvad status` output.
///
/// Understands both the multi-line form (`Connected` followed by
/// `Relay: <host>`) and the legacy single-line `Connected to <host> in ...`.
pub fn parse_status(output: &str) -> Result<Option<String>> {
    let first = output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default();
    let state = first.strip_prefix("Tunnel status:").unwrap_or(first).trim();

    if !state.starts_with("Connected") {
        return Ok(None);
    }

    for line in output.lines() {
        if let Some(rest) = line.trim().strip_prefix("Relay:") {
            if let Some(host) = rest.split_whitespace().next() {
                return Ok(Some(host.to_string()));
            }
        }
    }

    if let Some(rest) = state.strip_prefix("Connected to") {
        let host = rest
            .split_whitespace()
            .find(|tok| looks_like_hostname(tok));
        if let Some(host) = host {
            return Ok(Some(host.to_string()));
        }
    }

    Err(ToolError::Parse {
        tool: TOOL.to_string(),
        detail: format!("connected but no relay named in status: {}", first),
    }
    .into())
}

fn looks_like_hostname(tok: &str) -> bool {
    tok.contains('-')
        && tok
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}
