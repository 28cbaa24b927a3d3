//! Relay endpoints: the units a test run iterates over.

use serde::{Deserialize, Serialize};

pub mod catalog;

pub use catalog::{default_cache_path, load_endpoints, CatalogFilter};

/// Tunnel protocol a relay serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Wireguard,
    Openvpn,
    Bridge,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Wireguard => write!(f, "wireguard"),
            Protocol::Openvpn => write!(f, "openvpn"),
            Protocol::Bridge => write!(f, "bridge"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wireguard" | "wg" => Ok(Protocol::Wireguard),
            "openvpn" => Ok(Protocol::Openvpn),
            "bridge" => Ok(Protocol::Bridge),
            other => anyhow::bail!("unknown protocol '{}'", other),
        }
    }
}

/// A single VPN relay. Identity is the hostname.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub hostname: String,
    pub city: String,
    pub city_code: String,
    pub country: String,
    pub country_code: String,
    pub protocol: Option<Protocol>,
    /// Hosting provider, when the catalog names one.
    pub provider: Option<String>,
    pub ipv4_addr_in: Option<String>,
    pub owned: bool,
}

impl Endpoint {
    /// Minimal endpoint with only location codes; the rest is left empty.
    pub fn new(hostname: &str, country_code: &str, city_code: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            city: String::new(),
            city_code: city_code.to_string(),
            country: String::new(),
            country_code: country_code.to_string(),
            protocol: None,
            provider: None,
            ipv4_addr_in: None,
            owned: false,
        }
    }

    /// "City, Country" when names are known, otherwise the codes.
    pub fn location(&self) -> String {
        if self.city.is_empty() && self.country.is_empty() {
            format!("{}-{}", self.country_code, self.city_code)
        } else {
            format!("{}, {}", self.city, self.country)
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hostname)
    }
}
