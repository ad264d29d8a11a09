use serde::{Deserialize, Serialize};
use std::fmt;

/// A stored value. Serialized untagged, so longs render as plain JSON numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Long(i64),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Long(_) => ValueType::Long,
            Value::Bytes(_) => ValueType::Bytes,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            Value::Bytes(_) => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Long,
    Bytes,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Long => write!(f, "long"),
            ValueType::Bytes => write!(f, "bytes"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    KeyValue,
    Windowed,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::KeyValue => write!(f, "key-value"),
            StoreKind::Windowed => write!(f, "windowed"),
        }
    }
}

/// Windows of `size_ms`, kept for `retention_ms` of stream time.
///
/// Window starts are computed by the ingestion path. Hopping and sliding
/// windows start off the `size_ms` grid, so the store takes starts as given;
/// `size_ms` only bounds the retention a catalog may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub size_ms: i64,
    pub retention_ms: i64,
}

/// Cluster-wide definition of a logical store.
///
/// Every node must agree on `partitions`: it is an input of the key-to-partition
/// function shared by the write path and the query path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSpec {
    pub name: String,
    pub partitions: u32,
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<WindowSpec>,
}

impl StoreSpec {
    pub fn key_value(name: &str, partitions: u32, value_type: ValueType) -> Self {
        Self {
            name: name.to_string(),
            partitions,
            value_type,
            window: None,
        }
    }

    pub fn windowed(
        name: &str,
        partitions: u32,
        value_type: ValueType,
        size_ms: i64,
        retention_ms: i64,
    ) -> Self {
        Self {
            name: name.to_string(),
            partitions,
            value_type,
            window: Some(WindowSpec {
                size_ms,
                retention_ms,
            }),
        }
    }

    pub fn kind(&self) -> StoreKind {
        if self.window.is_some() {
            StoreKind::Windowed
        } else {
            StoreKind::KeyValue
        }
    }
}

/// One entry yielded by the shared `range`/`all` capability.
///
/// `window_start` is set only for entries of windowed stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_start: Option<i64>,
    pub value: Value,
}

impl Entry {
    pub fn plain(key: String, value: Value) -> Self {
        Self {
            key,
            window_start: None,
            value,
        }
    }

    pub fn windowed(key: String, window_start: i64, value: Value) -> Self {
        Self {
            key,
            window_start: Some(window_start),
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// The window had already fallen out of retention; nothing was written.
    Expired,
}
