//! Mullvad relay-cache (`relays.json`) parsing and filtering.

use super::{Endpoint, Protocol};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct RawCatalog {
    #[serde(default)]
    countries: Vec<RawCountry>,
    /// Newer daemons nest the location tree one level down.
    #[serde(default)]
    relays: Option<RawRelayTree>,
}

#[derive(Debug, Deserialize)]
struct RawRelayTree {
    #[serde(default)]
    countries: Vec<RawCountry>,
}

#[derive(Debug, Deserialize)]
struct RawCountry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    code: String,
    #[serde(default)]
    cities: Vec<RawCity>,
}

#[derive(Debug, Deserialize)]
struct RawCity {
    #[serde(default)]
    name: String,
    #[serde(default)]
    code: String,
    #[serde(default)]
    relays: Vec<RawRelay>,
}

#[derive(Debug, Deserialize)]
struct RawRelay {
    hostname: String,
    #[serde(default = "default_true")]
    active: bool,
    #[serde(default)]
    owned: bool,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    ipv4_addr_in: Option<String>,
    #[serde(default)]
    endpoint_data: serde_json::Value,
}

fn default_true() -> bool {
    true
}

/// Selection applied after parsing the catalog. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct CatalogFilter {
    pub country_code: Option<String>,
    pub city_code: Option<String>,
    pub protocol: Option<Protocol>,
    pub hostnames: Vec<String>,
    pub include_inactive: bool,
}

impl CatalogFilter {
    fn matches(&self, endpoint: &Endpoint, active: bool) -> bool {
        if !active && !self.include_inactive {
            return false;
        }
        if let Some(cc) = &self.country_code {
            if !endpoint.country_code.eq_ignore_ascii_case(cc) {
                return false;
            }
        }
        if let Some(city) = &self.city_code {
            if !endpoint.city_code.eq_ignore_ascii_case(city) {
                return false;
            }
        }
        if let Some(proto) = self.protocol {
            if endpoint.protocol != Some(proto) {
                return false;
            }
        }
        if !self.hostnames.is_empty()
            && !self
                .hostnames
                .iter()
                .any(|h| h.eq_ignore_ascii_case(&endpoint.hostname))
        {
            return false;
        }
        true
    }
}

/// Load and filter the relay catalog at `path`, preserving catalog order.
pub fn load_endpoints(path: &Path, filter: &CatalogFilter) -> Result<Vec<Endpoint>> {
    info!(path = %path.display(), "Loading relay catalog");
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read relay catalog: {}", path.display()))?;
    let endpoints = parse_catalog(&content, filter)
        .with_context(|| format!("failed to parse relay catalog: {}", path.display()))?;
    info!(count = endpoints.len(), "Relay catalog loaded");
    Ok(endpoints)
}

/// Parse catalog JSON into endpoints. Duplicate hostnames (ignoring case)
/// keep the first entry.
pub fn parse_catalog(json: &str, filter: &CatalogFilter) -> Result<Vec<Endpoint>> {
    let raw: RawCatalog = serde_json::from_str(json)?;
    let countries = match raw.relays {
        Some(tree) if raw.countries.is_empty() => tree.countries,
        _ => raw.countries,
    };

    let mut seen = HashSet::new();
    let mut endpoints = Vec::new();

    for country in countries {
        for city in country.cities {
            for relay in city.relays {
                let endpoint = Endpoint {
                    protocol: protocol_of(&relay.endpoint_data),
                    hostname: relay.hostname,
                    city: city.name.clone(),
                    city_code: city.code.clone(),
                    country: country.name.clone(),
                    country_code: country.code.clone(),
                    provider: relay.provider,
                    ipv4_addr_in: relay.ipv4_addr_in,
                    owned: relay.owned,
                };
                if !filter.matches(&endpoint, relay.active) {
                    continue;
                }
                if !seen.insert(endpoint.hostname.to_ascii_lowercase()) {
                    warn!(hostname = %endpoint.hostname, "Duplicate relay in catalog, keeping first");
                    continue;
                }
                endpoints.push(endpoint);
            }
        }
    }

    debug!(count = endpoints.len(), "Catalog entries after filtering");
    Ok(endpoints)
}

/// `{"wireguard": {...}}` for WireGuard, bare strings for the others.
fn protocol_of(endpoint_data: &serde_json::Value) -> Option<Protocol> {
    match endpoint_data {
        serde_json::Value::Object(map) if map.contains_key("wireguard") => {
            Some(Protocol::Wireguard)
        }
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Platform-specific location of the Mullvad daemon's relay cache.
pub fn default_cache_path() -> PathBuf {
    if cfg!(target_os = "macos") {
        PathBuf::from("/Library/Caches/mullvad-vpn/relays.json")
    } else if cfg!(target_os = "windows") {
        let program_data =
            std::env::var("PROGRAMDATA").unwrap_or_else(|_| "C:\\ProgramData".to_string());
        let system = PathBuf::from(program_data)
            .join("Mullvad VPN")
            .join("cache")
            .join("relays.json");
        let user = std::env::var("USERPROFILE").ok().map(|home| {
            PathBuf::from(home)
                .join("AppData")
                .join("Local")
                .join("Mullvad VPN")
                .join("cache")
                .join("relays.json")
        });
        prefer_existing(system, user)
    } else {
        let system = PathBuf::from("/var/cache/mullvad-vpn/relays.json");
        let user = std::env::var("HOME")
            .ok()
            .map(|home| PathBuf::from(home).join(".cache/mullvad-vpn/relays.json"));
        prefer_existing(system, user)
    }
}

/// `system` if it exists, otherwise the per-user location when known.
fn prefer_existing(system: PathBuf, user: Option<PathBuf>) -> PathBuf {
    if system.exists() {
        return system;
    }
    user.unwrap_or(system)
}
