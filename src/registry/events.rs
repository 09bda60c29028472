//! Registry notifications.

use serde::{Deserialize, Serialize};

use crate::registry::types::{ConfigDigest, DynamicConfig, StaticConfig};

/// Emitted by successful transitions, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryEvent {
    /// A new candidate was stored.
    ConfigSet {
        digest: ConfigDigest,
        version: u32,
        static_config: StaticConfig,
        dynamic_config: DynamicConfig,
    },
    /// The candidate became active.
    ConfigPromoted { digest: ConfigDigest },
    /// The previous active was discarded by a promotion.
    ActiveConfigRevoked { digest: ConfigDigest },
    /// The candidate was cleared or overwritten.
    CandidateConfigRevoked { digest: ConfigDigest },
}

impl RegistryEvent {
    pub fn digest(&self) -> ConfigDigest {
        match self {
            RegistryEvent::ConfigSet { digest, .. }
            | RegistryEvent::ConfigPromoted { digest }
            | RegistryEvent::ActiveConfigRevoked { digest }
            | RegistryEvent::CandidateConfigRevoked { digest } => *digest,
        }
    }

    /// Stable name used for logs and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            RegistryEvent::ConfigSet { .. } => "config_set",
            RegistryEvent::ConfigPromoted { .. } => "config_promoted",
            RegistryEvent::ActiveConfigRevoked { .. } => "active_config_revoked",
            RegistryEvent::CandidateConfigRevoked { .. } => "candidate_config_revoked",
        }
    }
}
