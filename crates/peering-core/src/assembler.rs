//! Address Assembler: single-node identity resolution.
//!
//! Resolving a node means:
//! 1. Short-circuit on a cached identity
//! 2. Inject the single upstream of env-var nodes, or assemble and write the
//!    connection string of `connectsTo` in index order
//! 3. Cache and register the node's own address if its type advertises one
//!
//! The node's own address is probed before anything is written to it, so a
//! node that cannot answer costs a single remote call per attempt. Probe
//! results that succeeded are kept across attempts until the node is stored
//! or forgotten, so a retry only repeats the step that failed.
//!
//! Every "probe identity of node X and cache it" step runs under a per-node
//! lock and re-checks the cache inside it. Locks are never held across two
//! nodes, so mutually dependent nodes cannot deadlock.

use crate::cache::{self, DEFAULT_IDENTITY_TTL, IdentityCache};
use crate::commands::RemoteCommand;
use crate::error::{ResolveError, Result};
use crate::metrics::MetricsRegistrar;
use crate::multiaddr::{
    ConnectionString, Host, MultiAddress, PEER_ID_LEN, has_valid_prefix,
    is_literal_address, truncate_peer_id,
};
use crate::peer::{MutualPeersConfig, NodeType, Peer};
use crate::resolver::{ExecRequest, RemoteResolver};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of resolving one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub node_name: String,
    /// The node's own advertised address, or the cached value on a hit
    pub address: Option<String>,
    /// Connection string written to the node, if it has dependencies
    pub connections: Option<ConnectionString>,
    /// Whether resolution short-circuited on the cache
    pub cached: bool,
}

impl Resolution {
    fn from_cache(node_name: &str, value: String) -> Self {
        Self {
            node_name: node_name.to_string(),
            address: Some(value),
            connections: None,
            cached: true,
        }
    }
}

/// Resolves identities and assembles connection strings.
pub struct AddressAssembler {
    config: Arc<MutualPeersConfig>,
    cache: Arc<dyn IdentityCache>,
    resolver: Arc<dyn RemoteResolver>,
    metrics: Arc<dyn MetricsRegistrar>,
    ttl: Duration,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Raw peer ids probed but not yet part of a stored address
    probed_ids: Mutex<HashMap<String, String>>,
    /// Own addresses probed but not yet stored
    pending: Mutex<HashMap<String, MultiAddress>>,
}

impl AddressAssembler {
    pub fn new(
        config: Arc<MutualPeersConfig>,
        cache: Arc<dyn IdentityCache>,
        resolver: Arc<dyn RemoteResolver>,
        metrics: Arc<dyn MetricsRegistrar>,
    ) -> Self {
        Self {
            config,
            cache,
            resolver,
            metrics,
            ttl: DEFAULT_IDENTITY_TTL,
            locks: Mutex::new(HashMap::new()),
            probed_ids: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Resolve one node end to end.
    pub async fn resolve(&self, peer: &Peer) -> Result<Resolution> {
        if let Some(value) = cache::lookup(self.cache.as_ref(), &peer.node_name).await {
            info!("{} already resolved, skipping: {}", peer.node_name, value);
            self.metrics.register(&peer.node_name, &value, &peer.namespace);
            return Ok(Resolution::from_cache(&peer.node_name, value));
        }

        let own = if peer.node_type.advertises_identity() {
            Some(self.own_address(peer).await?)
        } else {
            None
        };

        // Config validation guarantees env-var nodes have an upstream
        let connections = match peer.connects_to.first() {
            None => None,
            Some(upstream) if peer.connects_as_env_var => {
                self.inject_env_var(peer, upstream).await?;
                None
            }
            Some(_) => {
                let connections = self.assemble_connections(peer).await?;
                self.write_connections(peer, &connections).await?;
                Some(connections)
            }
        };

        let address = match own {
            Some(address) => {
                info!("Resolved {} -> {}", peer.node_name, address);
                self.store(peer, &address).await;
                memo(&self.pending).remove(&peer.node_name);
                Some(address.into_string())
            }
            None => None,
        };

        Ok(Resolution {
            node_name: peer.node_name.clone(),
            address,
            connections,
            cached: false,
        })
    }

    /// Drop partial probe results of a node, e.g. after it restarted.
    pub fn forget(&self, node_name: &str) {
        memo(&self.probed_ids).remove(node_name);
        memo(&self.pending).remove(node_name);
    }

    /// Build the connection string of a node, in `connectsTo` order.
    pub async fn assemble_connections(&self, peer: &Peer) -> Result<ConnectionString> {
        let mut connections = ConnectionString::new();
        for (i, entry) in peer.connects_to.iter().enumerate() {
            let segment = if is_literal_address(entry) {
                debug!("{}: using {} verbatim", peer.node_name, entry);
                entry
                    .parse::<MultiAddress>()
                    .map_err(|e| ResolveError::format(&peer.node_name, e))?
            } else {
                let dependency = self.dependency(entry, peer);
                self.resolve_dependency(&dependency, peer.dns_for(i)).await?
            };
            connections
                .push(segment.as_str())
                .map_err(|e| ResolveError::format(&peer.node_name, e))?;
        }
        Ok(connections)
    }

    /// Descriptor of a dependency; unknown names inherit the dependent's namespace.
    fn dependency(&self, name: &str, dependent: &Peer) -> Peer {
        match self.config.find_peer(name) {
            Some(p) => p.clone(),
            None => Peer::new(name, NodeType::Da).with_defaults(&dependent.namespace),
        }
    }

    /// Address of a dependency as seen by the dependent, which may pin a DNS name.
    async fn resolve_dependency(&self, dependency: &Peer, dns: Option<&str>) -> Result<MultiAddress> {
        let name = &dependency.node_name;
        if let Some(address) = self.cached_address(dependency, dns).await? {
            return Ok(address);
        }

        let lock = self.lock_for(name);
        let _guard = lock.lock().await;
        if let Some(address) = self.cached_address(dependency, dns).await? {
            return Ok(address);
        }

        let peer_id = self.peer_id_of(dependency).await?;
        let host = match dns {
            Some(dns) => Host::Dns(dns.to_string()),
            None => self.probe_ip(dependency).await?,
        };
        let address = MultiAddress::new(&host, &peer_id).map_err(|e| ResolveError::format(name, e))?;
        self.store(dependency, &address).await;
        Ok(address)
    }

    /// Turn a cached value into an address, re-prefixing for a pinned DNS name.
    async fn cached_address(&self, dependency: &Peer, dns: Option<&str>) -> Result<Option<MultiAddress>> {
        let name = &dependency.node_name;
        let Some(value) = cache::lookup(self.cache.as_ref(), name).await else {
            return Ok(None);
        };

        let peer_id = if has_valid_prefix(&value) {
            let cached: MultiAddress = value.parse().map_err(|e| ResolveError::format(name, e))?;
            if dns.is_none() {
                return Ok(Some(cached));
            }
            cached.peer_id().to_string()
        } else {
            // Bare identifier left by an older controller
            truncate_peer_id(value.trim(), PEER_ID_LEN).map_err(|e| ResolveError::format(name, e))?
        };

        let host = match dns {
            Some(dns) => Host::Dns(dns.to_string()),
            None => self.probe_ip(dependency).await?,
        };
        MultiAddress::new(&host, &peer_id)
            .map(Some)
            .map_err(|e| ResolveError::format(name, e))
    }

    /// The node's own advertised address, probed once and kept until stored.
    async fn own_address(&self, peer: &Peer) -> Result<MultiAddress> {
        let name = &peer.node_name;
        if let Some(address) = memo(&self.pending).get(name) {
            return Ok(address.clone());
        }

        let lock = self.lock_for(name);
        let _guard = lock.lock().await;
        if let Some(value) = cache::lookup(self.cache.as_ref(), name).await {
            return value.parse().map_err(|e| ResolveError::format(name, e));
        }

        let peer_id = self.peer_id_of(peer).await?;
        let host = if peer.dns_connections.is_empty() {
            self.probe_ip(peer).await?
        } else {
            Host::Dns(name.strip_suffix("-0").unwrap_or(name).to_string())
        };
        let address = MultiAddress::new(&host, &peer_id).map_err(|e| ResolveError::format(name, e))?;
        memo(&self.pending).insert(name.clone(), address.clone());
        Ok(address)
    }

    /// Raw peer id of a node, reusing an earlier successful probe.
    async fn peer_id_of(&self, peer: &Peer) -> Result<String> {
        if let Some(id) = memo(&self.probed_ids).get(&peer.node_name) {
            return Ok(id.clone());
        }
        let id = self.probe_identity(peer).await?;
        memo(&self.probed_ids).insert(peer.node_name.clone(), id.clone());
        Ok(id)
    }

    async fn probe_identity(&self, peer: &Peer) -> Result<String> {
        let output = self.exec(ExecRequest::main(peer, RemoteCommand::PeerInfo)).await?;
        let raw = output.trim();
        if raw.is_empty() {
            return Err(ResolveError::EmptyIdentity(peer.node_name.clone()));
        }
        truncate_peer_id(raw, PEER_ID_LEN).map_err(|e| ResolveError::format(&peer.node_name, e))
    }

    async fn probe_ip(&self, peer: &Peer) -> Result<Host> {
        let output = self.exec(ExecRequest::main(peer, RemoteCommand::NodeIp)).await?;
        if output.trim().is_empty() {
            return Err(ResolveError::EmptyIdentity(peer.node_name.clone()));
        }
        Host::parse_ip(&output).map_err(|e| ResolveError::format(&peer.node_name, e))
    }

    async fn inject_env_var(&self, peer: &Peer, upstream: &str) -> Result<()> {
        let command = RemoteCommand::EnvVarFile {
            value: upstream.to_string(),
            node_type: peer.node_type,
        };
        self.exec(ExecRequest::setup(peer, command)).await?;
        info!("{}: injected upstream {}", peer.node_name, upstream);
        Ok(())
    }

    async fn write_connections(&self, peer: &Peer, connections: &ConnectionString) -> Result<()> {
        let command = RemoteCommand::write_connections(connections.as_str());
        let echoed = self.exec(ExecRequest::setup(peer, command)).await?;
        if echoed.trim() != connections.as_str() {
            warn!(
                "{}: connection file reads back {:?}, expected {:?}",
                peer.node_name,
                echoed.trim(),
                connections.as_str()
            );
        }
        info!("{}: wrote connections {}", peer.node_name, connections);
        Ok(())
    }

    async fn exec(&self, request: ExecRequest) -> Result<String> {
        debug!("Running {} on {}/{}", request.command.name(), request.node_name, request.container);
        self.resolver
            .execute(&request)
            .await
            .map_err(|e| ResolveError::execution(&request.node_name, e))
    }

    /// Cache writes degrade to a warning; the value is recomputed next time.
    async fn store(&self, peer: &Peer, address: &MultiAddress) {
        if let Err(e) = self.cache.set(&peer.node_name, address.as_str(), self.ttl).await {
            warn!("Failed to cache identity of {}: {}", peer.node_name, e);
        }
        self.metrics
            .register(&peer.node_name, address.as_str(), &peer.namespace);
    }

    fn lock_for(&self, node_name: &str) -> Arc<tokio::sync::Mutex<()>> {
        memo(&self.locks).entry(node_name.to_string()).or_default().clone()
    }
}

fn memo<T>(map: &Mutex<T>) -> MutexGuard<'_, T> {
    map.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::error::ExecError;
    use crate::metrics::MultiAddrRegistry;
    use crate::peer::PeerGroup;
    use crate::testing::{FakeResolver, SAMPLE_ID};

    struct Fixture {
        assembler: AddressAssembler,
        cache: Arc<InMemoryCache>,
        resolver: Arc<FakeResolver>,
        metrics: Arc<MultiAddrRegistry>,
    }

    fn fixture(peers: Vec<Peer>) -> Fixture {
        let config = MutualPeersConfig {
            mutual_peers: vec![PeerGroup {
                peers,
                ..Default::default()
            }],
        }
        .with_defaults("default");
        let cache = Arc::new(InMemoryCache::new());
        let resolver = Arc::new(FakeResolver::new());
        let metrics = Arc::new(MultiAddrRegistry::default());
        let assembler = AddressAssembler::new(
            Arc::new(config),
            cache.clone(),
            resolver.clone(),
            metrics.clone(),
        );
        Fixture {
            assembler,
            cache,
            resolver,
            metrics,
        }
    }

    fn full_node(connects_to: &[&str]) -> Peer {
        Peer {
            connects_to: connects_to.iter().map(|s| s.to_string()).collect(),
            ..Peer::new("da-full-1", NodeType::Da)
        }
        .with_defaults("default")
    }

    #[tokio::test]
    async fn test_resolves_bare_dependency_by_ip() {
        let fx = fixture(vec![Peer::new("da-bridge-1", NodeType::Da)]);
        fx.resolver.peer_id("da-bridge-1", SAMPLE_ID);
        fx.resolver.ip("da-bridge-1", "10.0.0.5");
        fx.resolver.peer_id("da-full-1", SAMPLE_ID);
        fx.resolver.ip("da-full-1", "10.0.0.9");

        let peer = full_node(&["da-bridge-1"]);
        let resolution = fx.assembler.resolve(&peer).await.unwrap();

        let expected = format!("/ip4/10.0.0.5/tcp/2121/p2p/{SAMPLE_ID}");
        assert_eq!(resolution.connections.as_ref().unwrap().as_str(), expected);
        assert_eq!(
            fx.cache.get("da-bridge-1").await.unwrap().as_deref(),
            Some(expected.as_str())
        );
        assert_eq!(fx.resolver.written("da-full-1").as_deref(), Some(expected.as_str()));
        assert_eq!(
            resolution.address.as_deref(),
            Some(format!("/ip4/10.0.0.9/tcp/2121/p2p/{SAMPLE_ID}").as_str())
        );
        assert_eq!(fx.metrics.len(), 2);
    }

    #[tokio::test]
    async fn test_literal_dependency_used_verbatim() {
        let fx = fixture(vec![]);
        let literal = format!("/dns/da-bridge-2/tcp/2121/p2p/{SAMPLE_ID}");
        fx.resolver.peer_id("da-full-1", SAMPLE_ID);
        fx.resolver.ip("da-full-1", "10.0.0.9");

        let peer = full_node(&[&literal]);
        let connections = fx.assembler.assemble_connections(&peer).await.unwrap();

        assert_eq!(connections.as_str(), literal);
        assert_eq!(fx.resolver.calls_for("da-bridge-2"), 0);
        assert_eq!(fx.resolver.call_count(), 0);
    }

    #[tokio::test]
    async fn test_dns_connection_skips_ip_probe() {
        let fx = fixture(vec![]);
        fx.resolver.peer_id("da-bridge-1", SAMPLE_ID);

        let peer = Peer {
            dns_connections: vec!["da-bridge-1.svc".into()],
            ..full_node(&["da-bridge-1"])
        };
        let connections = fx.assembler.assemble_connections(&peer).await.unwrap();

        assert_eq!(
            connections.as_str(),
            format!("/dns/da-bridge-1.svc/tcp/2121/p2p/{SAMPLE_ID}")
        );
        assert_eq!(fx.resolver.calls_of("da-bridge-1", "node-ip"), 0);
    }

    #[tokio::test]
    async fn test_connection_order_follows_connects_to() {
        let fx = fixture(vec![]);
        fx.resolver.peer_id("da-bridge-1", SAMPLE_ID);
        fx.resolver.ip("da-bridge-1", "10.0.0.1");
        fx.resolver.peer_id("da-bridge-2", SAMPLE_ID);
        fx.resolver.ip("da-bridge-2", "10.0.0.2");
        let literal = format!("/dns/da-bridge-3/tcp/2121/p2p/{SAMPLE_ID}");

        let peer = full_node(&["da-bridge-2", &literal, "da-bridge-1"]);
        let connections = fx.assembler.assemble_connections(&peer).await.unwrap();

        let segments: Vec<_> = connections.segments().collect();
        assert_eq!(segments.len(), 3);
        assert!(segments[0].starts_with("/ip4/10.0.0.2/"));
        assert_eq!(segments[1], literal);
        assert!(segments[2].starts_with("/ip4/10.0.0.1/"));
        for segment in segments {
            assert_eq!(segment.rsplit('/').next().unwrap().len(), PEER_ID_LEN);
        }
    }

    #[tokio::test]
    async fn test_cached_node_makes_no_remote_calls() {
        let fx = fixture(vec![]);
        let addr = format!("/ip4/10.0.0.9/tcp/2121/p2p/{SAMPLE_ID}");
        fx.cache.set("da-full-1", &addr, DEFAULT_IDENTITY_TTL).await.unwrap();

        let peer = full_node(&["da-bridge-1"]);
        let first = fx.assembler.resolve(&peer).await.unwrap();
        let second = fx.assembler.resolve(&peer).await.unwrap();

        assert!(first.cached);
        assert_eq!(first, second);
        assert_eq!(first.address.as_deref(), Some(addr.as_str()));
        assert_eq!(fx.resolver.call_count(), 0);
    }

    #[tokio::test]
    async fn test_second_resolve_hits_cache() {
        let fx = fixture(vec![]);
        fx.resolver.peer_id("da-bridge-1", SAMPLE_ID);
        fx.resolver.ip("da-bridge-1", "10.0.0.5");

        let peer = Peer::new("da-bridge-1", NodeType::Da).with_defaults("default");
        let first = fx.assembler.resolve(&peer).await.unwrap();
        let calls = fx.resolver.call_count();
        let second = fx.assembler.resolve(&peer).await.unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.address, second.address);
        assert_eq!(fx.resolver.call_count(), calls);
    }

    #[tokio::test]
    async fn test_own_address_uses_dns_without_ordinal() {
        let fx = fixture(vec![]);
        fx.resolver.peer_id("da-full-1-0", SAMPLE_ID);
        let peer = Peer {
            node_name: "da-full-1-0".into(),
            dns_connections: vec!["da-bridge-1".into()],
            connects_to: vec![format!("/dns/da-bridge-1/tcp/2121/p2p/{SAMPLE_ID}")],
            ..Peer::new("", NodeType::Da)
        }
        .with_defaults("default");

        let resolution = fx.assembler.resolve(&peer).await.unwrap();

        assert_eq!(
            resolution.address.as_deref(),
            Some(format!("/dns/da-full-1/tcp/2121/p2p/{SAMPLE_ID}").as_str())
        );
    }

    #[tokio::test]
    async fn test_short_identity_is_format_error() {
        let fx = fixture(vec![]);
        fx.resolver.peer_id("da-full-1", SAMPLE_ID);
        fx.resolver.ip("da-full-1", "10.0.0.9");
        fx.resolver.peer_id("da-bridge-1", "12D3KooWshort");

        let peer = full_node(&["da-bridge-1"]);
        let err = fx.assembler.resolve(&peer).await.unwrap_err();

        assert!(err.is_format());
        assert!(fx.cache.get("da-bridge-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_long_identity_is_truncated() {
        let fx = fixture(vec![]);
        fx.resolver.peer_id("da-bridge-1", &format!("{SAMPLE_ID}trailing-noise"));
        fx.resolver.ip("da-bridge-1", "10.0.0.5");

        let peer = full_node(&["da-bridge-1"]);
        let connections = fx.assembler.assemble_connections(&peer).await.unwrap();

        assert_eq!(
            connections.as_str(),
            format!("/ip4/10.0.0.5/tcp/2121/p2p/{SAMPLE_ID}")
        );
    }

    #[tokio::test]
    async fn test_empty_identity_is_transient() {
        let fx = fixture(vec![]);
        fx.resolver.peer_id("da-bridge-1", "");

        let peer = Peer::new("da-bridge-1", NodeType::Da).with_defaults("default");
        let err = fx.assembler.resolve(&peer).await.unwrap_err();

        assert_eq!(err, ResolveError::EmptyIdentity("da-bridge-1".into()));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_execution_failure_propagates() {
        let fx = fixture(vec![]);
        fx.resolver.peer_id("da-full-1", SAMPLE_ID);
        fx.resolver.ip("da-full-1", "10.0.0.9");
        fx.resolver
            .fail("da-bridge-1", ExecError::Transport("connection reset".into()));

        let peer = full_node(&["da-bridge-1"]);
        let err = fx.assembler.resolve(&peer).await.unwrap_err();

        assert!(matches!(err, ResolveError::Execution { ref node, .. } if node == "da-bridge-1"));
        assert!(fx.resolver.written("da-full-1").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_node_costs_one_call() {
        let fx = fixture(vec![]);
        fx.resolver
            .fail_command("da-full-1", "peer-info", ExecError::Transport("connection reset".into()));

        let peer = full_node(&[&format!("/dns/da-bridge-2/tcp/2121/p2p/{SAMPLE_ID}")]);
        let err = fx.assembler.resolve(&peer).await.unwrap_err();

        assert!(err.is_transient());
        assert_eq!(fx.resolver.calls_for("da-full-1"), 1);
        assert!(fx.resolver.written("da-full-1").is_none());
    }

    #[tokio::test]
    async fn test_retry_repeats_only_failed_step() {
        let fx = fixture(vec![]);
        fx.resolver.peer_id("da-full-1", SAMPLE_ID);
        fx.resolver.ip("da-full-1", "10.0.0.9");
        fx.resolver
            .fail_command("da-full-1", "write-file", ExecError::Transport("connection reset".into()));
        let peer = full_node(&[&format!("/dns/da-bridge-2/tcp/2121/p2p/{SAMPLE_ID}")]);

        for _ in 0..3 {
            assert!(fx.assembler.resolve(&peer).await.is_err());
        }

        assert_eq!(fx.resolver.calls_of("da-full-1", "peer-info"), 1);
        assert_eq!(fx.resolver.calls_of("da-full-1", "node-ip"), 1);
        assert_eq!(fx.resolver.calls_of("da-full-1", "write-file"), 3);
        assert!(fx.cache.get("da-full-1").await.unwrap().is_none());
        assert!(fx.metrics.is_empty());
    }

    #[tokio::test]
    async fn test_forget_drops_partial_probes() {
        let fx = fixture(vec![]);
        fx.resolver.peer_id("da-full-1", SAMPLE_ID);
        fx.resolver
            .fail_command("da-full-1", "node-ip", ExecError::Transport("connection reset".into()));
        let peer = full_node(&[]);

        assert!(fx.assembler.resolve(&peer).await.is_err());
        assert!(fx.assembler.resolve(&peer).await.is_err());
        assert_eq!(fx.resolver.calls_of("da-full-1", "peer-info"), 1);

        fx.assembler.forget("da-full-1");
        assert!(fx.assembler.resolve(&peer).await.is_err());
        assert_eq!(fx.resolver.calls_of("da-full-1", "peer-info"), 2);
    }

    #[tokio::test]
    async fn test_cache_hit_registers_metric() {
        let fx = fixture(vec![]);
        let addr = format!("/ip4/10.0.0.9/tcp/2121/p2p/{SAMPLE_ID}");
        fx.cache.set("da-full-1", &addr, DEFAULT_IDENTITY_TTL).await.unwrap();

        let peer = full_node(&["da-bridge-1"]);
        fx.assembler.resolve(&peer).await.unwrap();
        fx.assembler.resolve(&peer).await.unwrap();

        assert_eq!(fx.metrics.len(), 1);
        assert_eq!(fx.resolver.call_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_literal_is_format_error() {
        let fx = fixture(vec![]);
        let peer = full_node(&["da-bridge.dns.local"]);

        let err = fx.assembler.assemble_connections(&peer).await.unwrap_err();

        assert!(err.is_format());
    }

    #[tokio::test]
    async fn test_env_var_node_gets_static_injection() {
        let fx = fixture(vec![]);
        let peer = Peer {
            connects_as_env_var: true,
            connects_to: vec!["consensus-validator-1".into()],
            ..Peer::new("consensus-full-1", NodeType::Consensus)
        }
        .with_defaults("default");

        let resolution = fx.assembler.resolve(&peer).await.unwrap();

        assert!(resolution.connections.is_none());
        assert!(resolution.address.is_none());
        let calls = fx.resolver.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].container, "consensus-setup");
        assert_eq!(
            calls[0].command,
            RemoteCommand::EnvVarFile {
                value: "consensus-validator-1".into(),
                node_type: NodeType::Consensus,
            }
        );
    }

    #[tokio::test]
    async fn test_env_var_node_without_upstream_injects_nothing() {
        let fx = fixture(vec![]);
        let peer = Peer {
            connects_as_env_var: true,
            ..Peer::new("consensus-full-1", NodeType::Consensus)
        }
        .with_defaults("default");

        let resolution = fx.assembler.resolve(&peer).await.unwrap();

        assert!(resolution.connections.is_none());
        assert_eq!(fx.resolver.call_count(), 0);
    }

    #[tokio::test]
    async fn test_legacy_bare_id_in_cache_is_prefixed() {
        let fx = fixture(vec![]);
        fx.cache.set("da-bridge-1", SAMPLE_ID, DEFAULT_IDENTITY_TTL).await.unwrap();
        fx.resolver.ip("da-bridge-1", "10.0.0.5");

        let peer = full_node(&["da-bridge-1"]);
        let connections = fx.assembler.assemble_connections(&peer).await.unwrap();

        assert_eq!(
            connections.as_str(),
            format!("/ip4/10.0.0.5/tcp/2121/p2p/{SAMPLE_ID}")
        );
        assert_eq!(fx.resolver.calls_of("da-bridge-1", "peer-info"), 0);
    }

    #[tokio::test]
    async fn test_concurrent_dependency_probed_once() {
        let fx = fixture(vec![]);
        fx.resolver.peer_id("da-bridge-1", SAMPLE_ID);
        fx.resolver.ip("da-bridge-1", "10.0.0.5");
        fx.resolver.delay("da-bridge-1", Duration::from_millis(20));
        let assembler = Arc::new(fx.assembler);

        let a = full_node(&["da-bridge-1"]);
        let b = Peer {
            node_name: "da-full-2".into(),
            ..a.clone()
        };
        let (ra, rb) = tokio::join!(
            assembler.assemble_connections(&a),
            assembler.assemble_connections(&b)
        );

        assert_eq!(ra.unwrap(), rb.unwrap());
        assert_eq!(fx.resolver.calls_of("da-bridge-1", "peer-info"), 1);
    }
}
