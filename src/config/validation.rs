//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, tick deadline below the poll interval)
//! - Check that domains are unique and their addresses and family tags fit
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ConfigValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{AppConfig, StoreBackend};
use crate::registry::DomainSeparator;

/// A single semantic problem in a loaded configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigValidationError {
    #[error("reader.poll_interval_ms must be greater than zero")]
    ZeroPollInterval,

    #[error("reader.tick_timeout_ms ({tick_timeout_ms}) must be positive and below poll_interval_ms ({poll_interval_ms})")]
    TickTimeoutTooLong {
        tick_timeout_ms: u64,
        poll_interval_ms: u64,
    },

    #[error("reader.max_concurrent_fetches must be greater than zero")]
    ZeroConcurrency,

    #[error("at least one [[domains]] entry is required")]
    NoDomains,

    #[error("duplicate domain name '{0}'")]
    DuplicateDomain(String),

    #[error("domain name must not be empty")]
    EmptyDomainName,

    #[error("domain '{domain}': {reason}")]
    InvalidDomain { domain: String, reason: String },

    #[error("store.rpc_url '{0}' is not a valid URL")]
    InvalidRpcUrl(String),

    #[error("observability.metrics_address '{0}' is not a socket address")]
    InvalidMetricsAddress(String),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ConfigValidationError>> {
    let mut errors = Vec::new();

    let reader = &config.reader;
    if reader.poll_interval_ms == 0 {
        errors.push(ConfigValidationError::ZeroPollInterval);
    } else if reader.tick_timeout_ms == 0 || reader.tick_timeout_ms >= reader.poll_interval_ms {
        errors.push(ConfigValidationError::TickTimeoutTooLong {
            tick_timeout_ms: reader.tick_timeout_ms,
            poll_interval_ms: reader.poll_interval_ms,
        });
    }
    if reader.max_concurrent_fetches == 0 {
        errors.push(ConfigValidationError::ZeroConcurrency);
    }

    if config.domains.is_empty() {
        errors.push(ConfigValidationError::NoDomains);
    }
    let mut names = HashSet::new();
    for domain in &config.domains {
        if domain.name.is_empty() {
            errors.push(ConfigValidationError::EmptyDomainName);
            continue;
        }
        if !names.insert(domain.name.as_str()) {
            errors.push(ConfigValidationError::DuplicateDomain(domain.name.clone()));
        }
        if let Err(reason) = domain.registry_address() {
            errors.push(ConfigValidationError::InvalidDomain {
                domain: domain.name.clone(),
                reason,
            });
        }
        if domain.family.len() > DomainSeparator::MAX_FAMILY_LEN {
            errors.push(ConfigValidationError::InvalidDomain {
                domain: domain.name.clone(),
                reason: domain.family_too_long(),
            });
        }
        if config.store.backend == StoreBackend::Evm && domain.chain_id != config.store.chain_id {
            errors.push(ConfigValidationError::InvalidDomain {
                domain: domain.name.clone(),
                reason: format!(
                    "chain_id {} does not match store.chain_id {}",
                    domain.chain_id, config.store.chain_id
                ),
            });
        }
    }

    if config.store.backend == StoreBackend::Evm {
        for url in std::iter::once(&config.store.rpc_url).chain(&config.store.failover_urls) {
            if url::Url::parse(url).is_err() {
                errors.push(ConfigValidationError::InvalidRpcUrl(url.clone()));
            }
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ConfigValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
