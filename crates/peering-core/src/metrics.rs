//! Deduplicating registry of resolved multiaddresses.
//!
//! The exporter that publishes these lives outside this crate; it reads
//! `snapshot()` whenever it needs the current set.

use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Sink for resolved (node, multiaddress) pairs.
pub trait MetricsRegistrar: Send + Sync {
    /// Idempotent. Empty addresses are ignored.
    fn register(&self, node_name: &str, multiaddr: &str, namespace: &str);
}

impl<T: MetricsRegistrar + ?Sized> MetricsRegistrar for std::sync::Arc<T> {
    fn register(&self, node_name: &str, multiaddr: &str, namespace: &str) {
        (**self).register(node_name, multiaddr, namespace)
    }
}

/// One observed multiaddress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiAddrInfo {
    pub service_name: String,
    pub node_name: String,
    pub multiaddr: String,
    pub namespace: String,
}

/// In-process registry keyed by multiaddress.
pub struct MultiAddrRegistry {
    service_name: String,
    entries: RwLock<HashMap<String, MultiAddrInfo>>,
}

impl MultiAddrRegistry {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Current entries, sorted by node name.
    pub fn snapshot(&self) -> Vec<MultiAddrInfo> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<_> = entries.values().cloned().collect();
        out.sort_by(|a, b| a.node_name.cmp(&b.node_name).then(a.multiaddr.cmp(&b.multiaddr)));
        out
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MultiAddrRegistry {
    fn default() -> Self {
        Self::new("peering-controller")
    }
}

impl MetricsRegistrar for MultiAddrRegistry {
    fn register(&self, node_name: &str, multiaddr: &str, namespace: &str) {
        if multiaddr.is_empty() {
            return;
        }
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(multiaddr) {
            return;
        }
        debug!("Registering {} for {}", multiaddr, node_name);
        entries.insert(
            multiaddr.to_string(),
            MultiAddrInfo {
                service_name: self.service_name.clone(),
                node_name: node_name.to_string(),
                multiaddr: multiaddr.to_string(),
                namespace: namespace.to_string(),
            },
        );
    }
}
