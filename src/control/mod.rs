//! Connection control: bringing a VPN tunnel up and down for one relay.

use crate::relay::Endpoint;
use anyhow::Result;

pub mod mullvad;

pub use mullvad::MullvadCli;

/// Trait for the external tool that owns the VPN connection.
///
/// Calls are made from one logical thread of control; implementations do
/// not need to handle concurrent connects.
#[async_trait::async_trait]
pub trait ConnectionController: Send + Sync {
    /// Point the tunnel at `endpoint` and ask the tool to connect.
    async fn connect(&self, endpoint: &Endpoint) -> Result<()>;

    /// Tear the tunnel down. Must tolerate being called while disconnected.
    async fn disconnect(&self) -> Result<()>;

    /// Single non-blocking poll. `Some(hostname)` when connected.
    async fn status(&self) -> Result<Option<String>>;

    /// Check if the tool is installed and answering.
    async fn is_available(&self) -> bool {
        true
    }
}
