//! Canonical encoding and digest computation.
//!
//! # Digest Layout
//! ```text
//! preimage = abi.encode(bytes32 family, uint256 chainId, address registry, uint32 version)
//!          ∥ abi.encode(StaticConfig)
//!          ∥ abi.encode(DynamicConfig)
//! digest   = prefix (2 bytes, big-endian) ∥ keccak256(preimage)[2..32]
//! ```
//!
//! The encoding is Solidity ABI, so any implementation following this layout
//! derives byte-identical digests from identical input. `CommitteeHome` is a
//! registry contract that hashes static and dynamic config together; an
//! RMNHome deployment digests the static config alone and will not match.
//! The same `sol!` bindings double as the RPC interface used by the EVM store.

use alloy::primitives::{keccak256, B256, U256};
use alloy::sol;
use alloy::sol_types::SolValue;

use crate::registry::types::{
    ConfigDigest, DomainSeparator, DomainSpec, DynamicConfig, Node, SourceScope, StaticConfig,
    VersionedConfig,
};

sol! {
    /// ABI of the on-chain committee registry.
    #[sol(rpc)]
    #[derive(Debug)]
    contract CommitteeHome {
        struct Node {
            bytes32 peerId;
            bytes32 offchainPublicKey;
        }

        struct SourceChain {
            uint64 chainSelector;
            uint64 minObservers;
            uint256 observerNodesBitmap;
        }

        struct StaticConfig {
            Node[] nodes;
            bytes offchainConfig;
        }

        struct DynamicConfig {
            SourceChain[] sourceChains;
            bytes offchainConfig;
        }

        struct VersionedConfig {
            uint32 version;
            bytes32 configDigest;
            StaticConfig staticConfig;
            DynamicConfig dynamicConfig;
        }

        error ConfigDigestMismatch(bytes32 expectedConfigDigest, bytes32 gotConfigDigest);
        error DigestNotFound(bytes32 configDigest);
        error DuplicateOffchainPublicKey();
        error DuplicatePeerId();
        error DuplicateSourceChain();
        error MinObserversTooHigh();
        error NoOpStateTransitionNotAllowed();
        error OutOfBoundsNodesLength();
        error OutOfBoundsObserverNodeIndex();
        error RevokingZeroDigestNotAllowed();

        event ConfigSet(bytes32 indexed configDigest, uint32 version, StaticConfig staticConfig, DynamicConfig dynamicConfig);
        event ConfigPromoted(bytes32 indexed configDigest);
        event ActiveConfigRevoked(bytes32 indexed configDigest);
        event CandidateConfigRevoked(bytes32 indexed configDigest);

        function getConfigDigests() external view returns (bytes32 activeConfigDigest, bytes32 candidateConfigDigest);
        function getConfig(bytes32 configDigest) external view returns (VersionedConfig memory versionedConfig, bool ok);
        function getAllConfigs() external view returns (VersionedConfig memory activeConfig, VersionedConfig memory candidateConfig);
        function typeAndVersion() external view returns (string memory);

        function setCandidate(StaticConfig calldata staticConfig, DynamicConfig calldata dynamicConfig, bytes32 digestToOverwrite) external returns (bytes32 newConfigDigest);
        function promoteCandidateAndRevokeActive(bytes32 digestToPromote, bytes32 digestToRevoke) external;
        function revokeCandidate(bytes32 configDigest) external;
    }
}

/// Compute the digest a domain assigns to `(version, static, dynamic)`.
pub fn config_digest(
    spec: &DomainSpec,
    version: u32,
    static_config: &StaticConfig,
    dynamic_config: &DynamicConfig,
) -> ConfigDigest {
    let mut preimage = encode_header(&spec.separator, version);
    preimage.extend_from_slice(&encode_static(static_config));
    preimage.extend_from_slice(&encode_dynamic(dynamic_config));
    apply_prefix(keccak256(&preimage), spec.digest_prefix)
}

/// `abi.encode(family, chainId, registry, version)`.
pub fn encode_header(separator: &DomainSeparator, version: u32) -> Vec<u8> {
    (
        separator.family,
        U256::from(separator.chain_id),
        separator.registry,
        version,
    )
        .abi_encode_params()
}

pub fn encode_static(config: &StaticConfig) -> Vec<u8> {
    CommitteeHome::StaticConfig::from(config).abi_encode()
}

pub fn encode_dynamic(config: &DynamicConfig) -> Vec<u8> {
    CommitteeHome::DynamicConfig::from(config).abi_encode()
}

fn apply_prefix(hash: B256, prefix: u16) -> ConfigDigest {
    let mut bytes = hash.0;
    bytes[..2].copy_from_slice(&prefix.to_be_bytes());
    ConfigDigest(B256::from(bytes))
}

impl From<&Node> for CommitteeHome::Node {
    fn from(node: &Node) -> Self {
        Self {
            peerId: node.identity_key,
            offchainPublicKey: node.auxiliary_key,
        }
    }
}

impl From<&SourceScope> for CommitteeHome::SourceChain {
    fn from(scope: &SourceScope) -> Self {
        Self {
            chainSelector: scope.scope_id,
            minObservers: scope.min_quorum,
            observerNodesBitmap: scope.membership_bitmap,
        }
    }
}

impl From<&StaticConfig> for CommitteeHome::StaticConfig {
    fn from(config: &StaticConfig) -> Self {
        Self {
            nodes: config.nodes.iter().map(Into::into).collect(),
            offchainConfig: config.offchain_config.clone(),
        }
    }
}

impl From<&DynamicConfig> for CommitteeHome::DynamicConfig {
    fn from(config: &DynamicConfig) -> Self {
        Self {
            sourceChains: config.source_scopes.iter().map(Into::into).collect(),
            offchainConfig: config.offchain_config.clone(),
        }
    }
}

impl From<CommitteeHome::StaticConfig> for StaticConfig {
    fn from(config: CommitteeHome::StaticConfig) -> Self {
        Self {
            nodes: config
                .nodes
                .into_iter()
                .map(|n| Node {
                    identity_key: n.peerId,
                    auxiliary_key: n.offchainPublicKey,
                })
                .collect(),
            offchain_config: config.offchainConfig,
        }
    }
}

impl From<CommitteeHome::DynamicConfig> for DynamicConfig {
    fn from(config: CommitteeHome::DynamicConfig) -> Self {
        Self {
            source_scopes: config
                .sourceChains
                .into_iter()
                .map(|c| SourceScope {
                    scope_id: c.chainSelector,
                    min_quorum: c.minObservers,
                    membership_bitmap: c.observerNodesBitmap,
                })
                .collect(),
            offchain_config: config.offchainConfig,
        }
    }
}

impl CommitteeHome::VersionedConfig {
    /// Convert a slot read from the chain. Empty slots come back zeroed.
    pub fn into_config(self) -> Option<VersionedConfig> {
        if self.configDigest == B256::ZERO {
            return None;
        }
        Some(VersionedConfig {
            version: self.version,
            digest: ConfigDigest(self.configDigest),
            static_config: self.staticConfig.into(),
            dynamic_config: self.dynamicConfig.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, Bytes};

    fn spec() -> DomainSpec {
        DomainSpec::new(
            "rmn/test",
            DomainSeparator::evm(31337, Address::repeat_byte(0x11)),
            0x000b,
        )
    }

    fn static_config() -> StaticConfig {
        StaticConfig {
            nodes: vec![
                Node {
                    identity_key: B256::repeat_byte(1),
                    auxiliary_key: B256::repeat_byte(2),
                },
                Node {
                    identity_key: B256::repeat_byte(3),
                    auxiliary_key: B256::repeat_byte(4),
                },
            ],
            offchain_config: Bytes::from_static(b"static"),
        }
    }

    fn dynamic_config() -> DynamicConfig {
        DynamicConfig {
            source_scopes: vec![SourceScope {
                scope_id: 5009297550715157269,
                min_quorum: 1,
                membership_bitmap: U256::from(0b11u64),
            }],
            offchain_config: Bytes::from_static(b"dynamic"),
        }
    }

    #[test]
    fn test_digest_is_deterministic() {
        let a = config_digest(&spec(), 1, &static_config(), &dynamic_config());
        let b = config_digest(&spec(), 1, &static_config(), &dynamic_config());
        assert_eq!(a, b);
        assert!(!a.is_zero());
    }

    #[test]
    fn test_digest_carries_prefix() {
        let digest = config_digest(&spec(), 1, &static_config(), &dynamic_config());
        assert_eq!(digest.prefix(), 0x000b);

        let mut other = spec();
        other.digest_prefix = 0x000a;
        let digest = config_digest(&other, 1, &static_config(), &dynamic_config());
        assert_eq!(digest.prefix(), 0x000a);
    }

    #[test]
    fn test_digest_sensitive_to_every_field() {
        let base = config_digest(&spec(), 1, &static_config(), &dynamic_config());

        assert_ne!(base, config_digest(&spec(), 2, &static_config(), &dynamic_config()));

        let mut other_chain = spec();
        other_chain.separator.chain_id = 1;
        assert_ne!(base, config_digest(&other_chain, 1, &static_config(), &dynamic_config()));

        let mut other_registry = spec();
        other_registry.separator.registry = Address::repeat_byte(0x22);
        assert_ne!(base, config_digest(&other_registry, 1, &static_config(), &dynamic_config()));

        let mut nodes_changed = static_config();
        nodes_changed.nodes[1].auxiliary_key = B256::repeat_byte(9);
        assert_ne!(base, config_digest(&spec(), 1, &nodes_changed, &dynamic_config()));

        let mut static_blob = static_config();
        static_blob.offchain_config = Bytes::from_static(b"static2");
        assert_ne!(base, config_digest(&spec(), 1, &static_blob, &dynamic_config()));

        let mut quorum = dynamic_config();
        quorum.source_scopes[0].min_quorum = 2;
        assert_ne!(base, config_digest(&spec(), 1, &static_config(), &quorum));

        let mut bitmap = dynamic_config();
        bitmap.source_scopes[0].membership_bitmap = U256::from(0b01u64);
        assert_ne!(base, config_digest(&spec(), 1, &static_config(), &bitmap));

        let mut dynamic_blob = dynamic_config();
        dynamic_blob.offchain_config = Bytes::new();
        assert_ne!(base, config_digest(&spec(), 1, &static_config(), &dynamic_blob));
    }

    #[test]
    fn test_node_order_matters() {
        let mut swapped = static_config();
        swapped.nodes.swap(0, 1);
        assert_ne!(
            config_digest(&spec(), 1, &static_config(), &dynamic_config()),
            config_digest(&spec(), 1, &swapped, &dynamic_config())
        );
    }

    #[test]
    fn test_header_layout() {
        let sep = spec().separator;
        let header = encode_header(&sep, 7);
        assert_eq!(header.len(), 128);
        assert_eq!(&header[..3], b"EVM");
        assert_eq!(header[63], 0x69); // 31337 = 0x7a69
        assert_eq!(header[62], 0x7a);
        assert_eq!(&header[76..96], sep.registry.as_slice());
        assert_eq!(header[127], 7);
    }

    #[test]
    fn test_static_encoding_layout() {
        let config = StaticConfig {
            nodes: vec![static_config().nodes[0]],
            offchain_config: Bytes::new(),
        };
        // offset, two heads, node array (len + one node), empty bytes (len)
        assert_eq!(encode_static(&config).len(), 32 + 64 + 96 + 32);
    }

    #[test]
    fn test_abi_conversion_preserves_fields() {
        let abi = CommitteeHome::VersionedConfig {
            version: 3,
            configDigest: B256::repeat_byte(0x42),
            staticConfig: (&static_config()).into(),
            dynamicConfig: (&dynamic_config()).into(),
        };
        let config = abi.into_config().unwrap();
        assert_eq!(config.version, 3);
        assert_eq!(config.static_config, static_config());
        assert_eq!(config.dynamic_config, dynamic_config());
    }

    #[test]
    fn test_empty_abi_slot_is_none() {
        let empty = CommitteeHome::VersionedConfig {
            version: 0,
            configDigest: B256::ZERO,
            staticConfig: (&StaticConfig::default()).into(),
            dynamicConfig: (&DynamicConfig::default()).into(),
        };
        assert!(empty.into_config().is_none());
    }
}
