//! Cluster Metadata Directory
//!
//! Answers "which node can serve this query" for a store or a `(store, key)` pair.
//!
//! ## Core Concepts
//! - **Catalog**: cluster-wide store definitions; fixes every store's partition count.
//! - **Resolver**: `partition = crc32(key) mod partitions`, shared with the write path.
//! - **Assignment Table**: versioned, immutable snapshots mapping each partition to
//!   exactly one owner; swapped atomically on rebalance.
//! - **Assignor**: deterministic round-robin placement over the alive members.

pub mod assignment;
pub mod assignor;
pub mod catalog;
pub mod cluster;
pub mod partitioner;
