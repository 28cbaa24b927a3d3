//! TOML configuration for relaybench.
//!
//! Layered: an explicit `--config` path, then the `RELAYBENCH_CONFIG`
//! environment variable, then `/etc/relaybench/relaybench.toml`, then
//! compiled-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::control::MullvadCli;
use crate::engine::RunConfig;
use crate::error::EngineError;
use crate::probe::{CliSpeedProbe, OoklaSpeedtest, PingProbe};
use crate::relay::Protocol;

const ENV_VAR: &str = "RELAYBENCH_CONFIG";
const SYSTEM_PATH: &str = "/etc/relaybench/relaybench.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub run: RunSettings,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Settings {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(settings)
    }

    /// An explicit path must load; the fallbacks only warn.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(ENV_VAR) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "RELAYBENCH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// File form of [`RunConfig`]. Durations are fractional seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub connect_timeout_secs: f64,
    pub retry_count: i64,
    pub verify_timeout_secs: f64,
    pub verify_poll_interval_secs: f64,
    pub ping_count: i64,
    pub ping_timeout_secs: f64,
    pub speed_test_enabled: bool,
    pub speed_test_timeout_secs: f64,
    pub disconnect_timeout_secs: f64,
    pub inter_endpoint_delay_secs: f64,
    pub stop_grace_period_secs: f64,
}

impl Default for RunSettings {
    fn default() -> Self {
        let d = RunConfig::default();
        Self {
            connect_timeout_secs: d.connect_timeout.as_secs_f64(),
            retry_count: i64::from(d.retry_count),
            verify_timeout_secs: d.verify_timeout.as_secs_f64(),
            verify_poll_interval_secs: d.verify_poll_interval.as_secs_f64(),
            ping_count: i64::from(d.ping_count),
            ping_timeout_secs: d.ping_timeout.as_secs_f64(),
            speed_test_enabled: d.speed_test_enabled,
            speed_test_timeout_secs: d.speed_test_timeout.as_secs_f64(),
            disconnect_timeout_secs: d.disconnect_timeout.as_secs_f64(),
            inter_endpoint_delay_secs: d.inter_endpoint_delay.as_secs_f64(),
            stop_grace_period_secs: d.stop_grace_period.as_secs_f64(),
        }
    }
}

impl RunSettings {
    /// Convert to a validated [`RunConfig`].
    pub fn to_run_config(&self) -> Result<RunConfig, EngineError> {
        let config = RunConfig {
            connect_timeout: secs("connect_timeout_secs", self.connect_timeout_secs)?,
            retry_count: count("retry_count", self.retry_count)?,
            verify_timeout: secs("verify_timeout_secs", self.verify_timeout_secs)?,
            verify_poll_interval: secs("verify_poll_interval_secs", self.verify_poll_interval_secs)?,
            ping_count: count("ping_count", self.ping_count)?,
            ping_timeout: secs("ping_timeout_secs", self.ping_timeout_secs)?,
            speed_test_enabled: self.speed_test_enabled,
            speed_test_timeout: secs("speed_test_timeout_secs", self.speed_test_timeout_secs)?,
            disconnect_timeout: secs("disconnect_timeout_secs", self.disconnect_timeout_secs)?,
            inter_endpoint_delay: secs("inter_endpoint_delay_secs", self.inter_endpoint_delay_secs)?,
            stop_grace_period: secs("stop_grace_period_secs", self.stop_grace_period_secs)?,
        };
        config.validate()?;
        Ok(config)
    }
}

fn secs(name: &str, value: f64) -> Result<Duration, EngineError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| EngineError::InvalidConfig(format!("{} must be a finite, non-negative number (got {})", name, value)))
}

fn count(name: &str, value: i64) -> Result<u32, EngineError> {
    u32::try_from(value)
        .map_err(|_| EngineError::InvalidConfig(format!("{} must be between 0 and {} (got {})", name, u32::MAX, value)))
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// External command-line tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub mullvad_path: String,
    pub ping_path: String,
    pub speedtest_path: String,
    /// Host pinged through the tunnel.
    pub ping_target: String,
    /// Per-reply wait handed to `ping`.
    pub ping_reply_timeout_secs: u64,
    /// Wait between `relay set location` and `connect`.
    pub settle_delay_secs: f64,
    /// Default tunnel protocol filter for `run` and `relays`. Unset means both.
    pub protocol: Option<Protocol>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            mullvad_path: "mullvad".to_string(),
            ping_path: "ping".to_string(),
            speedtest_path: "speedtest".to_string(),
            ping_target: "1.1.1.1".to_string(),
            ping_reply_timeout_secs: 5,
            settle_delay_secs: 1.0,
            protocol: None,
        }
    }
}

impl ToolsConfig {
    pub fn controller(&self) -> Result<MullvadCli> {
        let settle = Duration::try_from_secs_f64(self.settle_delay_secs)
            .with_context(|| format!("invalid tools.settle_delay_secs: {}", self.settle_delay_secs))?;
        Ok(MullvadCli::new(&self.mullvad_path, settle))
    }

    pub fn speed_probe(&self) -> CliSpeedProbe {
        CliSpeedProbe::new(
            PingProbe::new(
                &self.ping_path,
                &self.ping_target,
                Duration::from_secs(self.ping_reply_timeout_secs),
            ),
            OoklaSpeedtest::new(&self.speedtest_path),
        )
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Overrides the platform's Mullvad relay cache location.
    pub cache_path: Option<PathBuf>,
}

impl CatalogConfig {
    pub fn path(&self) -> PathBuf {
        self.cache_path.clone().unwrap_or_else(crate::relay::default_cache_path)
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = Settings::default();

        let run = cfg.run.to_run_config().unwrap();
        assert_eq!(run, RunConfig::default());

        assert_eq!(cfg.tools.mullvad_path, "mullvad");
        assert_eq!(cfg.tools.ping_target, "1.1.1.1");
        assert_eq!(cfg.tools.settle_delay_secs, 1.0);
        assert!(cfg.tools.protocol.is_none());

        assert!(cfg.catalog.cache_path.is_none());

        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[run]
connect_timeout_secs = 20
retry_count = 2
verify_poll_interval_secs = 0.25
speed_test_enabled = false
stop_grace_period_secs = 2.5

[tools]
mullvad_path = "/usr/local/bin/mullvad"
ping_target = "9.9.9.9"
protocol = "wireguard"

[catalog]
cache_path = "/tmp/relays.json"

[logging]
level = "debug"
json = true
"#;

        let cfg: Settings = toml::from_str(toml_str).unwrap();
        let run = cfg.run.to_run_config().unwrap();
        assert_eq!(run.connect_timeout, Duration::from_secs(20));
        assert_eq!(run.retry_count, 2);
        assert_eq!(run.verify_poll_interval, Duration::from_millis(250));
        assert!(!run.speed_test_enabled);
        assert_eq!(run.stop_grace_period, Duration::from_millis(2500));
        // Unset keys keep their defaults.
        assert_eq!(run.ping_count, 3);

        assert_eq!(cfg.tools.mullvad_path, "/usr/local/bin/mullvad");
        assert_eq!(cfg.tools.ping_target, "9.9.9.9");
        assert_eq!(cfg.tools.protocol, Some(Protocol::Wireguard));
        assert_eq!(cfg.catalog.path(), PathBuf::from("/tmp/relays.json"));
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
    }

    #[test]
    fn test_negative_values_rejected() {
        let mut run = RunSettings {
            connect_timeout_secs: -1.0,
            ..Default::default()
        };
        let err = run.to_run_config().unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(ref m) if m.contains("connect_timeout_secs")));

        run.connect_timeout_secs = 30.0;
        run.retry_count = -3;
        assert!(matches!(run.to_run_config(), Err(EngineError::InvalidConfig(_))));

        run.retry_count = 1;
        run.verify_timeout_secs = f64::NAN;
        assert!(run.to_run_config().is_err());
    }

    #[test]
    fn test_structural_violation_rejected() {
        let run = RunSettings {
            ping_count: 0,
            ..Default::default()
        };
        assert!(matches!(run.to_run_config(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[run]\nping_count = 5\n").unwrap();

        let cfg = Settings::load_or_default(Some(file.path())).unwrap();
        assert_eq!(cfg.run.ping_count, 5);
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(Settings::load_or_default(Some(&missing)).is_err());
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[run\nping_count = ").unwrap();
        assert!(Settings::load(file.path()).is_err());
    }
}
