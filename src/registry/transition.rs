//! Two-slot versioned configuration state machine.
//!
//! # States
//! ```text
//! EMPTY ──set──▶ CANDIDATE_ONLY ──promote──▶ ACTIVE_ONLY ──set──▶ ACTIVE_AND_CANDIDATE
//!   ▲                 │                          ▲                      │    │
//!   └─────revoke──────┘                          ├──────promote─────────┘    │
//!                                                └──────revoke───────────────┘
//! set on CANDIDATE_ONLY / ACTIVE_AND_CANDIDATE replaces the candidate in place.
//! ```
//!
//! # Design Decisions
//! - `ConfigRegistry` holds no state: every operation maps
//!   `(current state, input) → (new state, events)` or fails
//! - Failures return before anything is built, so the caller's state is untouched
//! - Linearization is the store's job; this module never locks

use std::collections::VecDeque;

use serde::Serialize;

use crate::registry::codec::config_digest;
use crate::registry::error::{RegistryError, RegistryResult};
use crate::registry::events::RegistryEvent;
use crate::registry::types::{
    ConfigDigest, DomainSpec, DynamicConfig, SlotState, StaticConfig, VersionedConfig,
};
use crate::registry::validation::validate_proposal;

/// Per-domain registry contents, owned by a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryState {
    active: Option<VersionedConfig>,
    candidate: Option<VersionedConfig>,
    /// Highest version ever assigned; never reused.
    last_version: u32,
    /// Displaced configs, newest first.
    history: VecDeque<VersionedConfig>,
}

impl RegistryState {
    /// State of a freshly created domain.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&VersionedConfig> {
        self.active.as_ref()
    }

    pub fn candidate(&self) -> Option<&VersionedConfig> {
        self.candidate.as_ref()
    }

    pub fn last_version(&self) -> u32 {
        self.last_version
    }

    pub fn history(&self) -> impl Iterator<Item = &VersionedConfig> {
        self.history.iter()
    }

    pub fn active_digest(&self) -> ConfigDigest {
        self.active.as_ref().map(|c| c.digest).unwrap_or_default()
    }

    pub fn candidate_digest(&self) -> ConfigDigest {
        self.candidate.as_ref().map(|c| c.digest).unwrap_or_default()
    }

    /// `(active, candidate)`; zero marks an empty slot.
    pub fn config_digests(&self) -> (ConfigDigest, ConfigDigest) {
        (self.active_digest(), self.candidate_digest())
    }

    pub fn slot_state(&self) -> SlotState {
        SlotState::from_digests(self.active_digest(), self.candidate_digest())
    }

    /// Look a digest up in both slots, then the retained history.
    pub fn get_config(&self, digest: ConfigDigest) -> Option<&VersionedConfig> {
        if digest.is_zero() {
            return None;
        }
        self.active
            .iter()
            .chain(self.candidate.iter())
            .chain(self.history.iter())
            .find(|c| c.digest == digest)
    }

    pub fn all_configs(&self) -> (Option<&VersionedConfig>, Option<&VersionedConfig>) {
        (self.active.as_ref(), self.candidate.as_ref())
    }

    fn retire(&mut self, config: VersionedConfig, depth: usize) {
        if depth == 0 {
            return;
        }
        self.history.push_front(config);
        self.history.truncate(depth);
    }
}

/// Result of a successful transition.
#[derive(Debug, Clone)]
pub struct Transition<T> {
    pub state: RegistryState,
    pub events: Vec<RegistryEvent>,
    pub output: T,
}

/// Validation and transition rules for one domain.
#[derive(Debug, Clone)]
pub struct ConfigRegistry {
    spec: DomainSpec,
}

impl ConfigRegistry {
    pub fn new(spec: DomainSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &DomainSpec {
        &self.spec
    }

    /// Digest this domain assigns to a proposal at `version`.
    pub fn digest(
        &self,
        version: u32,
        static_config: &StaticConfig,
        dynamic_config: &DynamicConfig,
    ) -> ConfigDigest {
        config_digest(&self.spec, version, static_config, dynamic_config)
    }

    /// Stage a new candidate, replacing any existing one.
    ///
    /// `expected_candidate` must equal the current candidate digest (zero
    /// when the slot is empty). Returns the new digest.
    pub fn set_candidate(
        &self,
        state: &RegistryState,
        static_config: StaticConfig,
        dynamic_config: DynamicConfig,
        expected_candidate: ConfigDigest,
    ) -> RegistryResult<Transition<ConfigDigest>> {
        validate_proposal(&static_config, &dynamic_config)?;

        let current = state.candidate_digest();
        if current != expected_candidate {
            return Err(RegistryError::DigestMismatch {
                expected: expected_candidate,
                actual: current,
            });
        }

        // Same content re-hashes to the same digest at the candidate's version.
        if let Some(candidate) = &state.candidate {
            if self.digest(candidate.version, &static_config, &dynamic_config) == candidate.digest {
                return Err(RegistryError::NoOpTransitionNotAllowed);
            }
        }

        let version = state
            .last_version
            .checked_add(1)
            .ok_or(RegistryError::VersionOverflow)?;
        let digest = self.digest(version, &static_config, &dynamic_config);

        let mut next = state.clone();
        let mut events = Vec::with_capacity(2);
        if let Some(old) = next.candidate.take() {
            events.push(RegistryEvent::CandidateConfigRevoked { digest: old.digest });
            next.retire(old, self.spec.retained_history);
        }
        events.push(RegistryEvent::ConfigSet {
            digest,
            version,
            static_config: static_config.clone(),
            dynamic_config: dynamic_config.clone(),
        });
        next.last_version = version;
        next.candidate = Some(VersionedConfig {
            version,
            digest,
            static_config,
            dynamic_config,
        });

        Ok(Transition {
            state: next,
            events,
            output: digest,
        })
    }

    /// Atomically make the candidate active and discard the previous active.
    ///
    /// `to_revoke` must equal the current active digest; zero matches only an
    /// empty active slot.
    pub fn promote_candidate_and_revoke_active(
        &self,
        state: &RegistryState,
        to_promote: ConfigDigest,
        to_revoke: ConfigDigest,
    ) -> RegistryResult<Transition<()>> {
        if to_promote.is_zero() {
            return Err(RegistryError::PromotingZeroDigestNotAllowed);
        }

        let candidate = state.candidate_digest();
        if candidate != to_promote {
            return Err(RegistryError::DigestMismatch {
                expected: to_promote,
                actual: candidate,
            });
        }

        let active = state.active_digest();
        if active != to_revoke {
            return Err(RegistryError::DigestMismatch {
                expected: to_revoke,
                actual: active,
            });
        }

        let mut next = state.clone();
        let mut events = Vec::with_capacity(2);
        if let Some(old) = next.active.take() {
            events.push(RegistryEvent::ActiveConfigRevoked { digest: old.digest });
            next.retire(old, self.spec.retained_history);
        }
        next.active = next.candidate.take();
        events.push(RegistryEvent::ConfigPromoted { digest: to_promote });

        Ok(Transition {
            state: next,
            events,
            output: (),
        })
    }

    /// Clear the candidate slot.
    pub fn revoke_candidate(
        &self,
        state: &RegistryState,
        digest: ConfigDigest,
    ) -> RegistryResult<Transition<()>> {
        if digest.is_zero() {
            return Err(RegistryError::RevokingZeroDigestNotAllowed);
        }

        let candidate = state.candidate_digest();
        if candidate != digest {
            return Err(RegistryError::DigestMismatch {
                expected: digest,
                actual: candidate,
            });
        }

        let mut next = state.clone();
        if let Some(old) = next.candidate.take() {
            next.retire(old, self.spec.retained_history);
        }

        Ok(Transition {
            state: next,
            events: vec![RegistryEvent::CandidateConfigRevoked { digest }],
            output: (),
        })
    }
}
