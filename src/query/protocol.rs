//! Query REST Protocol
//!
//! Route templates and the JSON bodies exchanged with clients and between
//! nodes when a request is forwarded to the owner of the data.

use serde::{Deserialize, Serialize};

use crate::directory::assignment::NodeInfo;
use crate::store::types::Value;

// --- API Endpoints ---

pub const ENDPOINT_KEY_VALUE: &str = "/state/keyvalue/:store/:key";
pub const ENDPOINT_ALL: &str = "/state/keyvalues/:store/all";
pub const ENDPOINT_RANGE: &str = "/state/keyvalues/:store/range/:from/:to";
pub const ENDPOINT_WINDOWED: &str = "/state/windowed/:store/:key/:from/:to";
pub const ENDPOINT_INSTANCES: &str = "/state/instances";
pub const ENDPOINT_INSTANCES_FOR_STORE: &str = "/state/instances/:store";
pub const ENDPOINT_INSTANCE_FOR_KEY: &str = "/state/instance/:store/:key";

/// Set on requests relayed to the owning node. The receiver serves them from
/// its local partitions and never relays them again.
pub const FORWARDED_HEADER: &str = "x-state-forwarded";

// --- Data Transfer Objects ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueResponse {
    pub key: String,
    pub value: Value,
}

/// One window of a windowed fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowedValue {
    pub key: String,
    pub window_start: i64,
    pub value: Value,
}

/// Public view of a node: where it listens and which stores it hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStoreInfo {
    pub host: String,
    pub port: u16,
    pub store_names: Vec<String>,
}

impl From<&NodeInfo> for HostStoreInfo {
    fn from(node: &NodeInfo) -> Self {
        Self {
            host: node.host.clone(),
            port: node.port,
            store_names: node.store_names(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
