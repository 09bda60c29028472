//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the registry
//! tooling. All types derive Serde traits for deserialization from TOML.

use std::time::Duration;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::registry::{DomainSeparator, DomainSpec};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Authoritative store connection.
    pub store: StoreConfig,

    /// Background reader settings.
    pub reader: ReaderConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Registry domains to manage or observe.
    pub domains: Vec<DomainConfig>,
}

/// Which store implementation backs the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Process-local store for library use and tests. The CLI rejects it.
    #[default]
    Memory,
    /// On-chain registry reached over JSON-RPC.
    Evm,
}

/// Store connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// JSON-RPC endpoint URL.
    pub rpc_url: String,

    /// Failover JSON-RPC endpoint URLs.
    pub failover_urls: Vec<String>,

    /// Chain ID the registry contracts live on.
    pub chain_id: u64,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,

    /// How long to wait for a transaction receipt, in seconds.
    pub tx_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            rpc_url: "http://localhost:8545".to_string(),
            failover_urls: Vec::new(),
            chain_id: 1,
            rpc_timeout_secs: 10,
            tx_timeout_secs: 120,
        }
    }
}

impl StoreConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn tx_timeout(&self) -> Duration {
        Duration::from_secs(self.tx_timeout_secs)
    }
}

/// Background reader configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Poll interval in milliseconds.
    pub poll_interval_ms: u64,

    /// Per-tick deadline in milliseconds. Must be below the poll interval.
    pub tick_timeout_ms: u64,

    /// Domains fetched concurrently within one tick.
    pub max_concurrent_fetches: usize,

    /// Displaced configs kept resolvable per domain.
    pub retained_history: usize,

    /// How long startup waits for the first full sync, in milliseconds.
    pub wait_ready_timeout_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            tick_timeout_ms: 5_000,
            max_concurrent_fetches: 4,
            retained_history: 4,
            wait_ready_timeout_ms: 30_000,
        }
    }
}

impl ReaderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn tick_timeout(&self) -> Duration {
        Duration::from_millis(self.tick_timeout_ms)
    }

    pub fn wait_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_ready_timeout_ms)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// One registry domain.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DomainConfig {
    /// Unique domain name, used as the domain ID.
    pub name: String,

    /// Chain family tag mixed into digests.
    #[serde(default = "default_family")]
    pub family: String,

    /// Chain the registry contract lives on.
    pub chain_id: u64,

    /// Registry contract address.
    pub registry_address: String,

    /// Codec tag in the first two digest bytes (e.g. 0x000b).
    pub digest_prefix: u16,

    /// Overrides `reader.retained_history` for this domain's store-side history.
    #[serde(default)]
    pub retained_history: Option<usize>,
}

fn default_family() -> String {
    "EVM".to_string()
}

impl DomainConfig {
    pub fn registry_address(&self) -> Result<Address, String> {
        self.registry_address
            .parse()
            .map_err(|e| format!("invalid registry address '{}': {}", self.registry_address, e))
    }

    /// Describe a family tag that does not fit the separator.
    pub fn family_too_long(&self) -> String {
        format!(
            "family '{}' is {} bytes, longer than {}",
            self.family,
            self.family.len(),
            DomainSeparator::MAX_FAMILY_LEN
        )
    }

    /// Build the registry domain spec.
    pub fn to_spec(&self, default_history: usize) -> Result<DomainSpec, String> {
        let registry = self.registry_address()?;
        let separator = DomainSeparator::new(&self.family, self.chain_id, registry)
            .ok_or_else(|| self.family_too_long())?;
        Ok(DomainSpec::new(self.name.as_str(), separator, self.digest_prefix)
        .with_retained_history(self.retained_history.unwrap_or(default_history)))
    }
}
