//! Node configuration: command-line flags plus a TOML file layered over the
//! embedded defaults in `config/default.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::directory::catalog::{CatalogError, StoreCatalog};
use crate::store::types::StoreSpec;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

#[derive(Parser, Debug, Clone)]
#[command(name = "queryable-state-node", version, about = "Queryable state cluster node")]
pub struct NodeArgs {
    /// Gossip (UDP) address to bind, e.g. 127.0.0.1:5000
    #[arg(long)]
    pub bind: SocketAddr,

    /// Gossip address of an existing member; repeat for several seeds
    #[arg(long = "seed")]
    pub seeds: Vec<SocketAddr>,

    /// HTTP query port. Defaults to the gossip port + 1000
    #[arg(long)]
    pub http_port: Option<u16>,

    /// Host name peers use to reach this node's HTTP port. Defaults to the bind IP
    #[arg(long)]
    pub advertised_host: Option<String>,

    /// TOML file overriding the embedded defaults
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    pub log_level: tracing::Level,
}

impl NodeArgs {
    pub fn http_port(&self) -> u16 {
        self.http_port
            .unwrap_or_else(|| self.bind.port().saturating_add(1000))
    }

    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind.ip(), self.http_port())
    }

    pub fn advertised_host(&self) -> String {
        self.advertised_host
            .clone()
            .unwrap_or_else(|| self.bind.ip().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingConfig {
    pub timeout_ms: u64,
    pub attempts: usize,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 500,
            attempts: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub stores: Vec<StoreSpec>,
    #[serde(default)]
    pub forwarding: ForwardingConfig,
}

/// Shape of a user config file; every section is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigOverrides {
    stores: Vec<StoreSpec>,
    forwarding: ForwardingOverrides,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ForwardingOverrides {
    timeout_ms: Option<u64>,
    attempts: Option<usize>,
}

impl NodeConfig {
    pub fn embedded() -> Result<Self> {
        toml::from_str(DEFAULT_CONFIG).context("embedded default config is invalid")
    }

    /// Embedded defaults, overridden by `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::embedded()?;
        if let Some(path) = path {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            config.merge_toml(&raw)
                .with_context(|| format!("failed to parse config {}", path.display()))?;
        }
        Ok(config)
    }

    /// A non-empty `[[stores]]` list replaces the whole catalog; forwarding
    /// settings override field by field.
    pub fn merge_toml(&mut self, raw: &str) -> Result<()> {
        let overrides: ConfigOverrides = toml::from_str(raw)?;
        if !overrides.stores.is_empty() {
            self.stores = overrides.stores;
        }
        if let Some(timeout_ms) = overrides.forwarding.timeout_ms {
            self.forwarding.timeout_ms = timeout_ms;
        }
        if let Some(attempts) = overrides.forwarding.attempts {
            self.forwarding.attempts = attempts;
        }
        Ok(())
    }

    pub fn catalog(&self) -> Result<StoreCatalog, CatalogError> {
        StoreCatalog::new(self.stores.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::ValueType;

    #[test]
    fn test_embedded_defaults_build_a_catalog() {
        let config = NodeConfig::embedded().unwrap();
        let catalog = config.catalog().unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("word-counts").unwrap().partitions, 4);
        assert!(catalog.get("windowed-word-counts").unwrap().window.is_some());
        assert_eq!(config.forwarding, ForwardingConfig::default());
    }

    #[test]
    fn test_file_overrides() {
        let mut config = NodeConfig::embedded().unwrap();
        config
            .merge_toml(
                r#"
                [[stores]]
                name = "blobs"
                partitions = 8
                value_type = "bytes"

                [forwarding]
                attempts = 1
                "#,
            )
            .unwrap();

        assert_eq!(config.stores, vec![StoreSpec::key_value("blobs", 8, ValueType::Bytes)]);
        assert_eq!(config.forwarding.attempts, 1);
        assert_eq!(config.forwarding.timeout_ms, 500);
    }

    #[test]
    fn test_empty_file_keeps_defaults() {
        let mut config = NodeConfig::embedded().unwrap();
        config.merge_toml("").unwrap();
        assert_eq!(config, NodeConfig::embedded().unwrap());
    }

    #[test]
    fn test_invalid_catalog_is_rejected() {
        let mut config = NodeConfig::embedded().unwrap();
        config
            .merge_toml(
                r#"
                [[stores]]
                name = "empty"
                partitions = 0
                value_type = "long"
                "#,
            )
            .unwrap();
        assert_eq!(
            config.catalog().unwrap_err(),
            CatalogError::NoPartitions("empty".into())
        );
    }

    #[test]
    fn test_args_defaults() {
        let args = NodeArgs::parse_from(["node", "--bind", "127.0.0.1:5000"]);
        assert_eq!(args.http_port(), 6000);
        assert_eq!(args.advertised_host(), "127.0.0.1");
        assert_eq!(args.log_level, tracing::Level::INFO);
        assert!(args.seeds.is_empty());

        let args = NodeArgs::parse_from([
            "node",
            "--bind",
            "0.0.0.0:5001",
            "--seed",
            "10.0.0.1:5000",
            "--seed",
            "10.0.0.2:5000",
            "--http-port",
            "8080",
            "--advertised-host",
            "node-b",
        ]);
        assert_eq!(args.seeds.len(), 2);
        assert_eq!(args.http_addr().to_string(), "0.0.0.0:8080");
        assert_eq!(args.advertised_host(), "node-b");
    }
}
