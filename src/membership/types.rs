use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use crate::directory::assignment::MemberEndpoint;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeState {
    Alive,
    Suspect,
    Dead,
}

impl NodeState {
    /// Suspected nodes keep their partitions until they are declared dead.
    pub fn is_live(self) -> bool {
        self != NodeState::Dead
    }
}

/// A single member of the cluster as seen by this node.
///
/// `gossip_addr` carries membership traffic; `query_host:query_port` is where the
/// member serves state queries. `incarnation` orders conflicting claims about the
/// member's state: only the member itself ever raises it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub gossip_addr: SocketAddr,
    pub query_host: String,
    pub query_port: u16,
    pub state: NodeState,
    pub incarnation: u64,

    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

impl Node {
    pub fn endpoint(&self) -> MemberEndpoint {
        MemberEndpoint {
            id: self.id.clone(),
            host: self.query_host.clone(),
            port: self.query_port,
        }
    }
}

/// Gossip wire protocol (bincode over UDP).
///
/// - `Ping/Ack`: liveness probe; the ack carries the sender's full member list.
/// - `Join`: sent by a starting node to its seeds, answered with an `Ack`.
/// - `Suspect/Alive`: disseminate health changes and refutations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    Ping {
        from: NodeId,
        incarnation: u64,
    },

    Ack {
        from: NodeId,
        incarnation: u64,
        members: Vec<Node>,
    },

    Join {
        node: Node,
    },

    Suspect {
        node_id: NodeId,
        incarnation: u64,
    },

    Alive {
        node_id: NodeId,
        incarnation: u64,
    },
}
