//! clamav-exporter-core - shared library for the ClamAV Prometheus exporter.
//!
//! Provides:
//! - `client`: clamd control-protocol dialing (TCP / Unix socket) and a mock dialer
//! - `parser`: tolerant parsers for PING, STATS and VERSION replies
//! - `collector`: one collection pass turning replies into metric observations
//! - `exporter`: `prometheus::core::Collector` adapter over the collection pass

pub mod client;
pub mod collector;
pub mod exporter;
pub mod parser;

/// Crate version with the git revision it was built from.
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_SHA"), ")");
