//! Reader-local views of registry state.
//!
//! # Design Decisions
//! - Configs are shared as `Arc<VersionedConfig>`; a digest is a content
//!   address, so an unchanged digest reuses the cached `Arc` across ticks
//! - A snapshot is never mutated after publication; each tick builds a new one

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::SystemTime;

use alloy::primitives::{Bytes, B256};
use serde::Serialize;

use crate::registry::{ConfigDigest, DomainId, VersionedConfig};

/// Eventually-consistent copy of one domain's registry state.
#[derive(Debug, Clone, Default)]
pub struct CachedSnapshot {
    pub active: Option<Arc<VersionedConfig>>,
    pub candidate: Option<Arc<VersionedConfig>>,
    /// Configs that left both slots, newest first.
    pub history: VecDeque<Arc<VersionedConfig>>,
    /// Time of the last successful sync.
    pub last_synced_at: Option<SystemTime>,
    /// Error of the most recent sync, cleared on success.
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

impl CachedSnapshot {
    pub fn is_synced(&self) -> bool {
        self.last_synced_at.is_some()
    }

    pub fn active_digest(&self) -> ConfigDigest {
        self.active.as_ref().map(|c| c.digest).unwrap_or_default()
    }

    pub fn candidate_digest(&self) -> ConfigDigest {
        self.candidate.as_ref().map(|c| c.digest).unwrap_or_default()
    }

    /// True if `digest` occupies the active or candidate slot.
    pub fn is_set(&self, digest: ConfigDigest) -> bool {
        !digest.is_zero() && (self.active_digest() == digest || self.candidate_digest() == digest)
    }

    /// Resolve a digest against both slots, then history.
    pub fn find(&self, digest: ConfigDigest) -> Option<&Arc<VersionedConfig>> {
        if digest.is_zero() {
            return None;
        }
        self.active
            .iter()
            .chain(self.candidate.iter())
            .chain(self.history.iter())
            .find(|c| c.digest == digest)
    }

    /// Successor after a successful sync.
    pub(crate) fn advance(
        &self,
        active: Option<Arc<VersionedConfig>>,
        candidate: Option<Arc<VersionedConfig>>,
        depth: usize,
        synced_at: SystemTime,
    ) -> Self {
        let held = |digest: ConfigDigest| {
            active.as_ref().is_some_and(|c| c.digest == digest)
                || candidate.as_ref().is_some_and(|c| c.digest == digest)
        };

        let mut history = self.history.clone();
        history.retain(|c| !held(c.digest));
        for old in self.active.iter().chain(self.candidate.iter()) {
            if !held(old.digest) && !history.iter().any(|c| c.digest == old.digest) {
                history.push_front(Arc::clone(old));
            }
        }
        history.truncate(depth);

        Self {
            active,
            candidate,
            history,
            last_synced_at: Some(synced_at),
            last_error: None,
            consecutive_failures: 0,
        }
    }

    /// Successor after a failed sync: same configs, error recorded.
    pub(crate) fn fail(&self, error: String) -> Self {
        Self {
            last_error: Some(error),
            consecutive_failures: self.consecutive_failures.saturating_add(1),
            ..self.clone()
        }
    }
}

/// A slot change observed between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConfigChange {
    ActiveChanged {
        domain: DomainId,
        previous: ConfigDigest,
        current: ConfigDigest,
    },
    CandidateChanged {
        domain: DomainId,
        previous: ConfigDigest,
        current: ConfigDigest,
    },
}

impl ConfigChange {
    /// Slot changes between `old` and `new`, active first.
    pub fn diff(domain: &DomainId, old: &CachedSnapshot, new: &CachedSnapshot) -> Vec<Self> {
        let mut changes = Vec::new();
        if old.active_digest() != new.active_digest() {
            changes.push(ConfigChange::ActiveChanged {
                domain: domain.clone(),
                previous: old.active_digest(),
                current: new.active_digest(),
            });
        }
        if old.candidate_digest() != new.candidate_digest() {
            changes.push(ConfigChange::CandidateChanged {
                domain: domain.clone(),
                previous: old.candidate_digest(),
                current: new.candidate_digest(),
            });
        }
        changes
    }

    pub fn slot(&self) -> &'static str {
        match self {
            ConfigChange::ActiveChanged { .. } => "active",
            ConfigChange::CandidateChanged { .. } => "candidate",
        }
    }
}

/// One committee member and the scopes it must observe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeInfo {
    /// Position in the node list; bit index in scope bitmaps.
    pub index: usize,
    pub identity_key: B256,
    pub auxiliary_key: B256,
    pub observed_scopes: BTreeSet<u64>,
}

/// Committee membership resolved from one config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSet {
    pub digest: ConfigDigest,
    pub version: u32,
    pub nodes: Vec<NodeInfo>,
}

impl NodeSet {
    pub fn from_config(config: &VersionedConfig) -> Self {
        let scopes = &config.dynamic_config.source_scopes;
        let nodes = config
            .static_config
            .nodes
            .iter()
            .enumerate()
            .map(|(index, node)| NodeInfo {
                index,
                identity_key: node.identity_key,
                auxiliary_key: node.auxiliary_key,
                observed_scopes: scopes
                    .iter()
                    .filter(|s| s.has_member(index))
                    .map(|s| s.scope_id)
                    .collect(),
            })
            .collect();
        Self {
            digest: config.digest,
            version: config.version,
            nodes,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Indices of the nodes observing `scope_id`.
    pub fn observers_of(&self, scope_id: u64) -> Vec<usize> {
        self.nodes
            .iter()
            .filter(|n| n.observed_scopes.contains(&scope_id))
            .map(|n| n.index)
            .collect()
    }
}

/// Opaque payloads carried by one config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OffchainConfig {
    pub static_config: Bytes,
    pub dynamic_config: Bytes,
}

/// `scope_id → min_quorum` for one config.
pub fn min_quorums(config: &VersionedConfig) -> BTreeMap<u64, u64> {
    config
        .dynamic_config
        .source_scopes
        .iter()
        .map(|s| (s.scope_id, s.min_quorum))
        .collect()
}
