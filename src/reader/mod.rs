//! Background registry reader.
//!
//! # Data Flow
//! ```text
//! interval tick
//!     → poller.rs: for each subscribed domain (bounded concurrency)
//!         → ConfigStore::get_config_digests
//!         → ConfigStore::get_config for digests not already cached
//!     → snapshot.rs: CachedSnapshot::advance / fail
//!     → ArcSwap::store (one atomic swap per domain)
//!     → ConfigChange broadcast for slot changes
//!
//! consumer query → ArcSwap::load → CachedSnapshot (no I/O)
//! ```

pub mod error;
pub mod poller;
pub mod snapshot;

pub use error::{ReaderError, ReaderResult};
pub use poller::{ConfigPair, ConfigReader, ReaderSettings};
pub use snapshot::{CachedSnapshot, ConfigChange, NodeInfo, NodeSet, OffchainConfig};
