//! Discovery configuration.
//!
//! [`DiscoveryConfig`] is the project-level input (seed addresses, limits and
//! per-contract overrides), usually loaded from a JSON file. [`CrawlConfig`]
//! holds the runtime tunables of the crawl engine.

mod overrides;

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

pub use overrides::{ContractOverrides, DiscoveryOverrides, FieldOverride, FieldTarget};

use crate::error::DiscoveryError;
use crate::provider::RetryPolicy;

pub const DEFAULT_MAX_DEPTH: usize = 7;
pub const DEFAULT_MAX_ADDRESSES: usize = 100;
pub const DEFAULT_CONCURRENCY: usize = 8;

/// A seed address with optional overrides of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct Seed {
    pub address: Address,
    pub overrides: Option<ContractOverrides>,
}

impl Seed {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            overrides: None,
        }
    }

    pub fn with_overrides(address: Address, overrides: ContractOverrides) -> Self {
        Self {
            address,
            overrides: Some(overrides),
        }
    }
}

/// Project discovery configuration, as stored on disk.
///
/// ```json
/// {
///   "name": "optimism",
///   "initialAddresses": ["0xbEb5Fc579115071764c7423A4f12eDde41f106Ed"],
///   "names": { "0xbEb5Fc579115071764c7423A4f12eDde41f106Ed": "OptimismPortal" },
///   "overrides": {
///     "OptimismPortal": { "ignoreInWatchMode": ["params"] }
///   }
/// }
/// ```
///
/// Override keys may be addresses or names declared in `names`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfig {
    pub name: String,
    pub initial_addresses: Vec<Address>,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_addresses")]
    pub max_addresses: usize,
    #[serde(default)]
    pub names: BTreeMap<Address, String>,
    #[serde(default)]
    pub overrides: BTreeMap<String, ContractOverrides>,
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_max_addresses() -> usize {
    DEFAULT_MAX_ADDRESSES
}

impl DiscoveryConfig {
    pub fn from_json_str(json: &str) -> Result<Self, DiscoveryError> {
        let config: DiscoveryConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DiscoveryError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        tracing::debug!(
            target: "discovery::config",
            path = %path.display(),
            "Loaded discovery config"
        );
        Self::from_json_str(&json)
    }

    fn validate(&self) -> Result<(), DiscoveryError> {
        if self.initial_addresses.is_empty() {
            return Err(DiscoveryError::Config(format!(
                "project '{}' has no initial addresses",
                self.name
            )));
        }
        if self.max_addresses == 0 {
            return Err(DiscoveryError::Config(format!(
                "project '{}' allows no addresses to be discovered",
                self.name
            )));
        }
        self.resolve_overrides().map(|_| ())
    }

    /// Overrides keyed by address, with `names` folded in as override names.
    pub fn resolve_overrides(&self) -> Result<DiscoveryOverrides, DiscoveryError> {
        let mut resolved = DiscoveryOverrides::default();

        for (key, overrides) in &self.overrides {
            let address = self.resolve_key(key)?;
            resolved.insert(address, overrides.clone());
        }

        for (address, name) in &self.names {
            let mut overrides = resolved.get(address).cloned().unwrap_or_default();
            overrides.name.get_or_insert_with(|| name.clone());
            resolved.insert(*address, overrides);
        }

        Ok(resolved)
    }

    fn resolve_key(&self, key: &str) -> Result<Address, DiscoveryError> {
        if let Ok(address) = Address::from_str(key) {
            return Ok(address);
        }
        self.names
            .iter()
            .find(|(_, name)| name.as_str() == key)
            .map(|(address, _)| *address)
            .ok_or_else(|| {
                DiscoveryError::Config(format!(
                    "override key '{}' is neither an address nor a known name",
                    key
                ))
            })
    }

    pub fn seeds(&self) -> Vec<Seed> {
        self.initial_addresses.iter().copied().map(Seed::new).collect()
    }

    /// Crawl tunables derived from this project's limits.
    pub fn crawl_config(&self) -> CrawlConfig {
        CrawlConfig::builder()
            .max_depth(self.max_depth)
            .max_addresses(self.max_addresses)
            .build()
    }
}

/// Runtime configuration of the crawl engine.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Maximum number of concurrent `analyze` calls.
    pub concurrency: usize,

    /// Relatives deeper than this (seeds are depth 0) are not analyzed.
    pub max_depth: usize,

    /// Maximum number of addresses analyzed in one crawl.
    pub max_addresses: usize,

    /// Optional wall-clock budget. When it runs out, the crawl stops and
    /// returns what has been committed so far.
    pub time_budget: Option<Duration>,

    /// Retry policy for chain reads (see [`RetryingChainReader`](crate::provider::RetryingChainReader)).
    pub retry_policy: RetryPolicy,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_depth: DEFAULT_MAX_DEPTH,
            max_addresses: DEFAULT_MAX_ADDRESSES,
            time_budget: None,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl CrawlConfig {
    pub fn builder() -> CrawlConfigBuilder {
        CrawlConfigBuilder::default()
    }
}

/// Builder for CrawlConfig.
#[derive(Debug, Default)]
pub struct CrawlConfigBuilder {
    concurrency: Option<usize>,
    max_depth: Option<usize>,
    max_addresses: Option<usize>,
    time_budget: Option<Duration>,
    retry_policy: Option<RetryPolicy>,
}

impl CrawlConfigBuilder {
    /// Sets the worker pool size. Values below 1 are raised to 1.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency.max(1));
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn max_addresses(mut self, count: usize) -> Self {
        self.max_addresses = Some(count);
        self
    }

    pub fn time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn build(self) -> CrawlConfig {
        let defaults = CrawlConfig::default();
        CrawlConfig {
            concurrency: self.concurrency.unwrap_or(defaults.concurrency),
            max_depth: self.max_depth.unwrap_or(defaults.max_depth),
            max_addresses: self.max_addresses.unwrap_or(defaults.max_addresses),
            time_budget: self.time_budget,
            retry_policy: self.retry_policy.unwrap_or(defaults.retry_policy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use std::io::Write;

    const PORTAL: Address = address!("0xbeb5fc579115071764c7423a4f12edde41f106ed");

    fn sample_json() -> String {
        r#"{
            "name": "optimism",
            "initialAddresses": ["0xbEb5Fc579115071764c7423A4f12eDde41f106Ed"],
            "maxDepth": 3,
            "names": { "0xbEb5Fc579115071764c7423A4f12eDde41f106Ed": "OptimismPortal" },
            "overrides": {
                "OptimismPortal": { "ignoreInWatchMode": ["params"] },
                "0x4200000000000000000000000000000000000016": { "ignoreDiscovery": true }
            }
        }"#
        .to_string()
    }

    #[test]
    fn test_parse_config_with_defaults() {
        let config = DiscoveryConfig::from_json_str(&sample_json()).unwrap();
        assert_eq!(config.name, "optimism");
        assert_eq!(config.max_depth, 3);
        assert_eq!(config.max_addresses, DEFAULT_MAX_ADDRESSES);
        assert_eq!(config.seeds(), vec![Seed::new(PORTAL)]);
    }

    #[test]
    fn test_resolve_overrides_by_name_and_address() {
        let config = DiscoveryConfig::from_json_str(&sample_json()).unwrap();
        let overrides = config.resolve_overrides().unwrap();

        let portal = overrides.get(&PORTAL).unwrap();
        assert_eq!(portal.name.as_deref(), Some("OptimismPortal"));
        assert_eq!(portal.ignore_in_watch_mode, vec!["params".to_string()]);
        assert!(overrides.is_ignored(&address!("0x4200000000000000000000000000000000000016")));
    }

    #[test]
    fn test_unknown_override_key_is_rejected() {
        let json = r#"{
            "name": "broken",
            "initialAddresses": ["0xbEb5Fc579115071764c7423A4f12eDde41f106Ed"],
            "overrides": { "NoSuchContract": {} }
        }"#;
        let err = DiscoveryConfig::from_json_str(json).unwrap_err();
        assert!(matches!(err, DiscoveryError::Config(_)));
    }

    #[test]
    fn test_empty_initial_addresses_rejected() {
        let json = r#"{ "name": "empty", "initialAddresses": [] }"#;
        assert!(matches!(
            DiscoveryConfig::from_json_str(json),
            Err(DiscoveryError::Config(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(sample_json().as_bytes()).unwrap();

        let config = DiscoveryConfig::from_file(file.path()).unwrap();
        assert_eq!(config.initial_addresses, vec![PORTAL]);

        let crawl = config.crawl_config();
        assert_eq!(crawl.max_depth, 3);
        assert_eq!(crawl.concurrency, DEFAULT_CONCURRENCY);
    }

    #[test]
    fn test_builder_clamps_concurrency() {
        let config = CrawlConfig::builder().concurrency(0).build();
        assert_eq!(config.concurrency, 1);
    }
}
