//! Registry data model.
//!
//! All payload types derive Serde traits so proposals can be read from JSON
//! files and snapshots can be printed by operator tooling.

use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

/// Maximum committee size. Bounded by the width of the membership bitmap.
pub const MAX_NODES: usize = 256;

/// Content hash identifying one `(version, static, dynamic)` tuple.
///
/// The zero value denotes an empty slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigDigest(pub B256);

impl ConfigDigest {
    /// The empty-slot digest.
    pub const ZERO: Self = Self(B256::ZERO);

    /// True for the empty-slot digest.
    pub fn is_zero(&self) -> bool {
        self.0 == B256::ZERO
    }

    /// Leading two bytes, which carry the domain's codec tag.
    pub fn prefix(&self) -> u16 {
        u16::from_be_bytes([self.0[0], self.0[1]])
    }
}

impl From<B256> for ConfigDigest {
    fn from(value: B256) -> Self {
        Self(value)
    }
}

impl From<ConfigDigest> for B256 {
    fn from(digest: ConfigDigest) -> Self {
        digest.0
    }
}

impl fmt::Display for ConfigDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConfigDigest {
    type Err = alloy::hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<B256>().map(Self)
    }
}

/// Opaque identifier scoping one committee instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainId(pub String);

impl DomainId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DomainId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DomainId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Binds digests to one registry deployment so identical payloads in two
/// domains never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainSeparator {
    /// Chain family tag, right-padded (e.g. `"EVM"`).
    pub family: B256,
    /// Chain the registry lives on.
    pub chain_id: u64,
    /// Address of the registry on that chain.
    pub registry: Address,
}

impl DomainSeparator {
    /// Longest family tag that fits the padded field.
    pub const MAX_FAMILY_LEN: usize = 32;

    /// Build a separator from a short family tag such as `"EVM"`.
    ///
    /// Returns `None` for tags longer than [`Self::MAX_FAMILY_LEN`] bytes.
    pub fn new(family: &str, chain_id: u64, registry: Address) -> Option<Self> {
        (family.len() <= Self::MAX_FAMILY_LEN)
            .then(|| Self::padded(family.as_bytes(), chain_id, registry))
    }

    pub fn evm(chain_id: u64, registry: Address) -> Self {
        Self::padded(b"EVM", chain_id, registry)
    }

    fn padded(family: &[u8], chain_id: u64, registry: Address) -> Self {
        let mut tag = [0u8; 32];
        tag[..family.len()].copy_from_slice(family);
        Self {
            family: B256::from(tag),
            chain_id,
            registry,
        }
    }
}

/// Everything needed to run the registry protocol for one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainSpec {
    pub id: DomainId,
    pub separator: DomainSeparator,
    /// Codec tag written into the first two digest bytes.
    pub digest_prefix: u16,
    /// Number of displaced configs kept reachable by digest.
    pub retained_history: usize,
}

impl DomainSpec {
    pub fn new(id: impl Into<DomainId>, separator: DomainSeparator, digest_prefix: u16) -> Self {
        Self {
            id: id.into(),
            separator,
            digest_prefix,
            retained_history: 0,
        }
    }

    pub fn with_retained_history(mut self, depth: usize) -> Self {
        self.retained_history = depth;
        self
    }
}

/// A committee member descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    /// Peer identity key.
    pub identity_key: B256,
    /// Offchain signing key.
    pub auxiliary_key: B256,
}

/// Which subset of nodes must observe one external source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceScope {
    pub scope_id: u64,
    pub min_quorum: u64,
    /// Bit `i` set means `nodes[i]` observes this source.
    pub membership_bitmap: U256,
}

impl SourceScope {
    /// Number of member nodes.
    pub fn member_count(&self) -> usize {
        self.membership_bitmap.count_ones()
    }

    /// True if `nodes[index]` is a member.
    pub fn has_member(&self, index: usize) -> bool {
        index < MAX_NODES && self.membership_bitmap.bit(index)
    }
}

/// Committee membership. Changing it means a new committee.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StaticConfig {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub offchain_config: Bytes,
}

/// Operational parameters versioned independently of membership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DynamicConfig {
    pub source_scopes: Vec<SourceScope>,
    #[serde(default)]
    pub offchain_config: Bytes,
}

/// A stored configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionedConfig {
    pub version: u32,
    pub digest: ConfigDigest,
    pub static_config: StaticConfig,
    pub dynamic_config: DynamicConfig,
}

/// Occupancy of the two registry slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Empty,
    CandidateOnly,
    ActiveOnly,
    ActiveAndCandidate,
}

impl SlotState {
    pub fn from_digests(active: ConfigDigest, candidate: ConfigDigest) -> Self {
        match (active.is_zero(), candidate.is_zero()) {
            (true, true) => SlotState::Empty,
            (true, false) => SlotState::CandidateOnly,
            (false, true) => SlotState::ActiveOnly,
            (false, false) => SlotState::ActiveAndCandidate,
        }
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotState::Empty => "EMPTY",
            SlotState::CandidateOnly => "CANDIDATE_ONLY",
            SlotState::ActiveOnly => "ACTIVE_ONLY",
            SlotState::ActiveAndCandidate => "ACTIVE_AND_CANDIDATE",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_digest() {
        assert!(ConfigDigest::ZERO.is_zero());
        assert!(!ConfigDigest(B256::repeat_byte(1)).is_zero());
        assert_eq!(ConfigDigest::default(), ConfigDigest::ZERO);
    }

    #[test]
    fn test_digest_parse_and_display() {
        let digest = ConfigDigest(B256::repeat_byte(0xab));
        let parsed: ConfigDigest = digest.to_string().parse().unwrap();
        assert_eq!(parsed, digest);
        assert_eq!(digest.prefix(), 0xabab);
    }

    #[test]
    fn test_domain_separator_family_padding() {
        let sep = DomainSeparator::evm(1, Address::ZERO);
        assert_eq!(&sep.family[..3], b"EVM");
        assert!(sep.family[3..].iter().all(|b| *b == 0));
        assert_eq!(DomainSeparator::new("EVM", 1, Address::ZERO), Some(sep));
    }

    #[test]
    fn test_domain_separator_rejects_long_family() {
        let at_limit = "x".repeat(DomainSeparator::MAX_FAMILY_LEN);
        let sep = DomainSeparator::new(&at_limit, 1, Address::ZERO).unwrap();
        assert!(sep.family.iter().all(|b| *b == b'x'));

        let a = format!("{at_limit}-a");
        assert!(DomainSeparator::new(&a, 1, Address::ZERO).is_none());
    }

    #[test]
    fn test_slot_state_from_digests() {
        let d = ConfigDigest(B256::repeat_byte(7));
        let z = ConfigDigest::ZERO;
        assert_eq!(SlotState::from_digests(z, z), SlotState::Empty);
        assert_eq!(SlotState::from_digests(z, d), SlotState::CandidateOnly);
        assert_eq!(SlotState::from_digests(d, z), SlotState::ActiveOnly);
        assert_eq!(SlotState::from_digests(d, d), SlotState::ActiveAndCandidate);
        assert_eq!(SlotState::ActiveAndCandidate.to_string(), "ACTIVE_AND_CANDIDATE");
    }

    #[test]
    fn test_scope_membership() {
        let scope = SourceScope {
            scope_id: 1,
            min_quorum: 1,
            membership_bitmap: U256::from(0b101u64),
        };
        assert_eq!(scope.member_count(), 2);
        assert!(scope.has_member(0));
        assert!(!scope.has_member(1));
        assert!(scope.has_member(2));
        assert!(!scope.has_member(300));
    }
}
