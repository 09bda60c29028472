//! Versioned committee configuration registry.
//!
//! # Data Flow
//! ```text
//! proposal (StaticConfig, DynamicConfig)
//!     → validation.rs (membership and scope checks)
//!     → codec.rs (ABI encoding + prefixed keccak digest)
//!     → transition.rs (two-slot state machine)
//!     → (new RegistryState, Vec<RegistryEvent>)
//!     → committed by a store
//! ```
//!
//! # Design Decisions
//! - Pure logic: the registry never owns or locks state
//! - Digests are content addresses; equal digests mean equal configs
//! - Every failure is all-or-nothing

pub mod codec;
pub mod error;
pub mod events;
pub mod transition;
pub mod types;
pub mod validation;

pub use error::{ErrorClass, RegistryError, RegistryResult, RejectedRule, ValidationError};
pub use events::RegistryEvent;
pub use transition::{ConfigRegistry, RegistryState, Transition};
pub use types::{
    ConfigDigest, DomainId, DomainSeparator, DomainSpec, DynamicConfig, Node, SlotState,
    SourceScope, StaticConfig, VersionedConfig, MAX_NODES,
};
