//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! registry stores and reader produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields (domain, digest, version) on every registry log line
//! - Reader sync failures surface here only, never to query callers

pub mod logging;
pub mod metrics;
