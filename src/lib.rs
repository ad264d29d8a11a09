//! Distributed Queryable State
//!
//! Each node hosts some partitions of a set of named stores and answers
//! read-only queries against them. Any node can tell which node owns a given
//! store or key, and the REST layer relays requests to that owner.
//!
//! ## Architecture Modules
//! - **`store`**: the Local Store Engine. Plain and windowed stores over
//!   per-partition skip lists with lazy, leak-free scans and retention.
//! - **`directory`**: store catalog, key-to-partition resolver, the versioned
//!   partition assignment table and the cluster metadata directory on top.
//! - **`membership`**: UDP gossip (SWIM-like) for discovery and failure detection.
//! - **`rebalance`**: recomputes ownership when membership changes and syncs
//!   the local engine.
//! - **`query`**: the Query Façade plus its axum REST surface.
//! - **`config`**: CLI flags and TOML configuration.
//! - **`error`**: the typed error taxonomy shared by all of the above.

pub mod config;
pub mod directory;
pub mod error;
pub mod membership;
pub mod query;
pub mod rebalance;
pub mod store;

pub use error::{Result, StateError};
