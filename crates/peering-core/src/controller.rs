//! Controller: wires resolution, propagation and discovery together.

use crate::assembler::{AddressAssembler, Resolution};
use crate::cache::IdentityCache;
use crate::error::ResolveError;
use crate::metrics::MetricsRegistrar;
use crate::peer::{MutualPeersConfig, Peer};
use crate::propagator::{FanoutPropagator, PropagationReport};
use crate::queue::{QueueHandle, WorkHandler};
use crate::resolver::RemoteResolver;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Workload name prefix the controller reacts to by default.
pub const DEFAULT_NODE_PREFIX: &str = "da";

pub struct Controller {
    config: Arc<MutualPeersConfig>,
    cache: Arc<dyn IdentityCache>,
    assembler: AddressAssembler,
    propagator: FanoutPropagator,
    node_prefix: String,
    cancel: CancellationToken,
}

impl Controller {
    pub fn new(
        config: Arc<MutualPeersConfig>,
        cache: Arc<dyn IdentityCache>,
        resolver: Arc<dyn RemoteResolver>,
        metrics: Arc<dyn MetricsRegistrar>,
    ) -> Self {
        let assembler = AddressAssembler::new(config.clone(), cache.clone(), resolver.clone(), metrics);
        Self {
            config,
            cache,
            assembler,
            propagator: FanoutPropagator::new(resolver),
            node_prefix: DEFAULT_NODE_PREFIX.to_string(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_node_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.node_prefix = prefix.into();
        self
    }

    /// Token that cuts in-flight propagation short.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Lifetime of identities written to the cache.
    pub fn with_identity_ttl(mut self, ttl: Duration) -> Self {
        self.assembler = self.assembler.with_ttl(ttl);
        self
    }

    pub fn config(&self) -> &MutualPeersConfig {
        &self.config
    }

    /// Resolve a node, then share the known addresses across its group.
    pub async fn process(&self, peer: &Peer) -> Result<Resolution, ResolveError> {
        if self.cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        let resolution = self.assembler.resolve(peer).await?;

        if peer.node_type.advertises_identity() {
            if let Some(report) = self.propagate(&peer.node_name).await {
                if !report.failures.is_empty() {
                    warn!(
                        "{}: {} of {} trusted-peer updates failed",
                        peer.node_name,
                        report.failures.len(),
                        report.attempted
                    );
                }
            }
        }
        Ok(resolution)
    }

    /// Run the propagator over the group of `node_name`.
    pub async fn propagate(&self, node_name: &str) -> Option<PropagationReport> {
        let group = self.config.group_of(node_name)?;
        let records = match self.cache.list_all().await {
            Ok(records) => records,
            Err(e) => {
                warn!("Cannot list identities for propagation: {}", e);
                return None;
            }
        };
        Some(self.propagator.propagate(&records, group, &self.cancel).await)
    }

    /// Discovery contract: enqueue configured nodes that just became ready.
    pub fn on_workload_event(&self, queue: &QueueHandle, node_name: &str, ready: bool) -> bool {
        if !ready {
            debug!("{} not ready, ignoring", node_name);
            return false;
        }
        if !node_name.starts_with(&self.node_prefix) {
            debug!("{} does not match prefix {:?}, ignoring", node_name, self.node_prefix);
            return false;
        }
        let Some(peer) = self.config.find_peer(node_name) else {
            debug!("{} is not in the configuration, ignoring", node_name);
            return false;
        };
        info!("{} is ready, queueing", node_name);
        self.assembler.forget(node_name);
        queue.enqueue(peer.clone())
    }

    /// Queue every configured node of the advertising type.
    pub fn seed(&self, queue: &QueueHandle) -> usize {
        let mut seeded = 0;
        for peer in self.config.peers().filter(|p| p.node_type.advertises_identity()) {
            if queue.enqueue(peer.clone()) {
                seeded += 1;
            }
        }
        seeded
    }
}

#[async_trait]
impl WorkHandler for Controller {
    async fn handle(&self, peer: &Peer) -> Result<(), ResolveError> {
        self.process(peer).await.map(|_| ())
    }
}
