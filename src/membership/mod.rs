//! Membership & Discovery Module
//!
//! Gossip-based membership (SWIM-like) over UDP. Each node learns which peers
//! exist, where they serve state queries, and when they fail.
//!
//! ## Core Mechanisms
//! - **Gossip**: periodic ping/ack exchanges carry the sender's whole member list.
//! - **Failure detection**: silent members go Alive -> Suspect -> Dead on timeouts.
//! - **Incarnations**: a suspected node refutes by gossiping a higher incarnation.
//! - **Topology version**: a watch channel bumped whenever the live member set
//!   changes, consumed by the rebalancer.

pub mod service;
pub mod types;
