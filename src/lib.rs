//! relaybench -- sequential latency and throughput testing of VPN relays.
//!
//! The [`engine`] drives a list of relay [`relay::Endpoint`]s one at a time
//! through connect, verify, ping, speed test and disconnect, talking to the
//! outside world only through the [`control::ConnectionController`] and
//! [`probe::SpeedProbe`] traits. The CLI-backed implementations of those
//! traits wrap the `mullvad`, `ping` and `speedtest` tools.

pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod logging;
pub mod probe;
pub mod relay;
pub mod report;
