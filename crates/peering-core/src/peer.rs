//! Peer descriptors and mutual-peer groups.
//!
//! `Peer` values are immutable templates read from configuration. The only
//! mutable field, `retry_count`, belongs to the work item placed on the retry
//! queue and is never read from or written to configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// Default container running a `da` node.
pub const DA_CONTAINER: &str = "da";
/// Default init/sidecar container used to configure a `da` node.
pub const DA_SETUP_CONTAINER: &str = "da-setup";
/// Default container running a `consensus` node.
pub const CONSENSUS_CONTAINER: &str = "consensus";
/// Default init/sidecar container used to configure a `consensus` node.
pub const CONSENSUS_SETUP_CONTAINER: &str = "consensus-setup";
/// Directory holding the trusted-peer list when a group doesn't name one.
pub const DEFAULT_TRUSTED_PEERS_PATH: &str = "/tmp/";

/// Errors found while validating peer configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Peer name cannot be empty")]
    EmptyName,
    #[error("Duplicate peer name: {0}")]
    DuplicateName(String),
    #[error("Peer {node}: dnsConnections has {dns} entries but connectsTo has {connects}")]
    MisalignedDns {
        node: String,
        dns: usize,
        connects: usize,
    },
    #[error("Peer {0} connects as env var but has no connectsTo entry")]
    MissingEnvVarTarget(String),
}

/// Kind of node running in a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// Single upstream dependency, usually injected statically.
    Consensus,
    /// Data availability node, may have several upstream dependencies.
    #[default]
    Da,
}

impl NodeType {
    /// Whether nodes of this type advertise their own identity to dependents.
    pub fn advertises_identity(&self) -> bool {
        matches!(self, NodeType::Da)
    }
}

impl Display for NodeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Consensus => write!(f, "consensus"),
            NodeType::Da => write!(f, "da"),
        }
    }
}

/// A workload descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    /// Pod name, unique within a namespace
    pub node_name: String,
    #[serde(default)]
    pub node_type: NodeType,
    #[serde(default)]
    pub container_name: String,
    /// Init/sidecar container used for configuration-time execution
    #[serde(default)]
    pub container_setup_name: String,
    /// Receives its single upstream through static file injection
    #[serde(default)]
    pub connects_as_env_var: bool,
    /// Bare node names, literal multiaddresses or DNS names
    #[serde(default)]
    pub connects_to: Vec<String>,
    /// DNS hostnames aligned by index with `connects_to`
    #[serde(default)]
    pub dns_connections: Vec<String>,
    #[serde(default)]
    pub namespace: String,
    /// Attempts made so far (work-item state, never configured)
    #[serde(skip)]
    pub retry_count: u32,
}

impl Peer {
    /// Create a peer with only a name and type set.
    pub fn new(node_name: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            node_name: node_name.into(),
            node_type,
            ..Default::default()
        }
    }

    /// Fill empty container names and namespace with the node type defaults.
    pub fn with_defaults(mut self, namespace: &str) -> Self {
        let (container, setup) = match self.node_type {
            NodeType::Da => (DA_CONTAINER, DA_SETUP_CONTAINER),
            NodeType::Consensus => (CONSENSUS_CONTAINER, CONSENSUS_SETUP_CONTAINER),
        };
        if self.container_name.is_empty() {
            self.container_name = container.to_string();
        }
        if self.container_setup_name.is_empty() {
            self.container_setup_name = setup.to_string();
        }
        if self.namespace.is_empty() {
            self.namespace = namespace.to_string();
        }
        self
    }

    /// DNS hostname configured for the dependency at `index`, if any.
    pub fn dns_for(&self, index: usize) -> Option<&str> {
        self.dns_connections
            .get(index)
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Check the per-peer invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if !self.dns_connections.is_empty() && self.dns_connections.len() != self.connects_to.len() {
            return Err(ConfigError::MisalignedDns {
                node: self.node_name.clone(),
                dns: self.dns_connections.len(),
                connects: self.connects_to.len(),
            });
        }
        if self.connects_as_env_var && self.connects_to.is_empty() {
            return Err(ConfigError::MissingEnvVarTarget(self.node_name.clone()));
        }
        Ok(())
    }
}

/// A set of peers intended to become mutually connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PeerGroup {
    #[serde(default)]
    pub peers: Vec<Peer>,
    /// Consensus node used for the chain-height probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_node: Option<String>,
    /// Directory holding each member's `TRUSTED_PEERS` file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trusted_peers_path: Option<String>,
}

impl PeerGroup {
    pub fn trusted_peers_path(&self) -> &str {
        self.trusted_peers_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_TRUSTED_PEERS_PATH)
    }

    pub fn contains(&self, node_name: &str) -> bool {
        self.peers.iter().any(|p| p.node_name == node_name)
    }
}

/// Root of the mutual-peers configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MutualPeersConfig {
    #[serde(default)]
    pub mutual_peers: Vec<PeerGroup>,
}

impl MutualPeersConfig {
    /// Apply node type defaults to every peer.
    pub fn with_defaults(mut self, namespace: &str) -> Self {
        for group in &mut self.mutual_peers {
            group.peers = std::mem::take(&mut group.peers)
                .into_iter()
                .map(|p| p.with_defaults(namespace))
                .collect();
        }
        self
    }

    /// Validate every peer and reject duplicate names across groups.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for peer in self.peers() {
            peer.validate()?;
            if !seen.insert(peer.node_name.as_str()) {
                return Err(ConfigError::DuplicateName(peer.node_name.clone()));
            }
        }
        Ok(())
    }

    /// Iterate over every configured peer.
    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.mutual_peers.iter().flat_map(|g| g.peers.iter())
    }

    /// Find a configured peer by node name.
    pub fn find_peer(&self, node_name: &str) -> Option<&Peer> {
        self.peers().find(|p| p.node_name == node_name)
    }

    /// The group a node belongs to.
    pub fn group_of(&self, node_name: &str) -> Option<&PeerGroup> {
        self.mutual_peers.iter().find(|g| g.contains(node_name))
    }
}
