//! Committee configuration registry and reader.

pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod reader;
pub mod registry;
pub mod store;

pub use config::AppConfig;
pub use lifecycle::Shutdown;
pub use reader::{ConfigReader, ReaderSettings};
pub use registry::{ConfigDigest, ConfigRegistry, DomainId, DomainSpec, RegistryError};
pub use store::{ConfigStore, InMemoryConfigStore, StoreError};
