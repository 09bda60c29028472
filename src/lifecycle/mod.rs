//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs, startup.rs):
//!     Load config → Validate → Init logging/metrics → Build store → Start reader
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Trigger broadcast → Reader loop exits → stop() returns
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
