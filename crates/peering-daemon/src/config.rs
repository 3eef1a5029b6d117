//! Configuration loading

use std::path::Path;

use anyhow::{Context, Result};
use peering_core::MutualPeersConfig;
use tracing::{info, warn};

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Load, default and validate the mutual-peers file.
pub fn load_peers(path: &Path, namespace: &str) -> Result<MutualPeersConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    let config = parse_peers(&content, namespace)
        .with_context(|| format!("Invalid config file: {:?}", path))?;
    info!(
        "Loaded {} peer group(s), {} peer(s) from {:?}",
        config.mutual_peers.len(),
        config.peers().count(),
        path
    );
    Ok(config)
}

/// Parse mutual-peers YAML and apply the namespace defaults.
pub fn parse_peers(content: &str, namespace: &str) -> Result<MutualPeersConfig> {
    let config: MutualPeersConfig =
        serde_yaml::from_str(content).context("Failed to parse mutual peers YAML")?;
    let config = config.with_defaults(namespace);
    config.validate()?;
    Ok(config)
}

/// The controller's namespace, falling back to `default`.
pub fn namespace_or_default(namespace: Option<String>) -> String {
    match namespace.filter(|ns| !ns.trim().is_empty()) {
        Some(ns) => ns,
        None => {
            warn!("POD_NAMESPACE not set, using {:?}", DEFAULT_NAMESPACE);
            DEFAULT_NAMESPACE.to_string()
        }
    }
}
