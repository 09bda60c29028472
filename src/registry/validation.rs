//! Proposal validation.
//!
//! # Responsibilities
//! - Bound the committee size
//! - Reject duplicate identity and auxiliary keys
//! - Check every source scope against the node list
//!
//! # Design Decisions
//! - Pure function of the proposal; no registry state is consulted
//! - Stops at the first violation, matching the registry contract's revert order

use std::collections::HashSet;

use alloy::primitives::U256;

use crate::registry::error::ValidationError;
use crate::registry::types::{DynamicConfig, StaticConfig, MAX_NODES};

/// Validate a `(static, dynamic)` proposal.
pub fn validate_proposal(
    static_config: &StaticConfig,
    dynamic_config: &DynamicConfig,
) -> Result<(), ValidationError> {
    validate_static(static_config)?;
    validate_dynamic(dynamic_config, static_config.nodes.len())
}

fn validate_static(config: &StaticConfig) -> Result<(), ValidationError> {
    let count = config.nodes.len();
    if count == 0 || count > MAX_NODES {
        return Err(ValidationError::NodeCountOutOfBounds {
            count,
            max: MAX_NODES,
        });
    }

    let mut identities = HashSet::with_capacity(count);
    let mut auxiliaries = HashSet::with_capacity(count);
    for (index, node) in config.nodes.iter().enumerate() {
        if !identities.insert(node.identity_key) {
            return Err(ValidationError::DuplicateIdentityKey { index });
        }
        if !auxiliaries.insert(node.auxiliary_key) {
            return Err(ValidationError::DuplicateAuxiliaryKey { index });
        }
    }
    Ok(())
}

fn validate_dynamic(config: &DynamicConfig, node_count: usize) -> Result<(), ValidationError> {
    let mut seen = HashSet::with_capacity(config.source_scopes.len());
    for scope in &config.source_scopes {
        if !seen.insert(scope.scope_id) {
            return Err(ValidationError::DuplicateScope {
                scope_id: scope.scope_id,
            });
        }

        // A full committee can address every bit.
        if node_count < MAX_NODES && (scope.membership_bitmap >> node_count) != U256::ZERO {
            return Err(ValidationError::MemberIndexOutOfBounds {
                scope_id: scope.scope_id,
                node_count,
            });
        }

        let members = scope.member_count();
        if scope.min_quorum > members as u64 {
            return Err(ValidationError::QuorumTooHigh {
                scope_id: scope.scope_id,
                min_quorum: scope.min_quorum,
                members,
            });
        }
    }
    Ok(())
}
