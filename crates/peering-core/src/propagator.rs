//! Fan-out Propagator: pushes resolved addresses to every other group member.
//!
//! One task per (resolved node, target node) pair. Failures are collected, not
//! retried; node-level retry belongs to the queue.

use crate::commands::RemoteCommand;
use crate::error::ExecError;
use crate::multiaddr::has_valid_prefix;
use crate::peer::PeerGroup;
use crate::resolver::{ExecRequest, RemoteResolver};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// One failed pairwise write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationFailure {
    pub source: String,
    pub target: String,
    pub error: ExecError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<PropagationFailure>,
    /// Set when cancellation cut the wait short
    pub cancelled: bool,
}

impl PropagationReport {
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.failures.is_empty() && self.succeeded == self.attempted
    }
}

pub struct FanoutPropagator {
    resolver: Arc<dyn RemoteResolver>,
}

impl FanoutPropagator {
    pub fn new(resolver: Arc<dyn RemoteResolver>) -> Self {
        Self { resolver }
    }

    /// Append every resolved member's address to every other member's trusted-peer list.
    pub async fn propagate(
        &self,
        records: &HashMap<String, String>,
        group: &PeerGroup,
        cancel: &CancellationToken,
    ) -> PropagationReport {
        let dir = group.trusted_peers_path().to_string();
        let mut tasks = JoinSet::new();
        let mut report = PropagationReport::default();

        for source in &group.peers {
            let Some(address) = records.get(&source.node_name) else {
                continue;
            };
            if !has_valid_prefix(address) {
                warn!("Skipping malformed address of {}: {:?}", source.node_name, address);
                continue;
            }
            for target in group.peers.iter().filter(|t| t.node_name != source.node_name) {
                let request = ExecRequest::main(
                    target,
                    RemoteCommand::AppendTrustedPeer {
                        address: address.clone(),
                        dir: dir.clone(),
                    },
                );
                let resolver = self.resolver.clone();
                let source = source.node_name.clone();
                report.attempted += 1;
                tasks.spawn(async move {
                    let result = resolver.execute(&request).await;
                    (source, request.node_name, result)
                });
            }
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    report.cancelled = true;
                    break;
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((source, target, Ok(output)))) => {
                        debug!("{} trusts {}: {}", target, source, output.trim());
                        report.succeeded += 1;
                    }
                    Some(Ok((source, target, Err(error)))) => {
                        report.failures.push(PropagationFailure { source, target, error });
                    }
                    Some(Err(e)) => error!("Propagation task failed: {}", e),
                },
            }
        }

        for failure in &report.failures {
            error!(
                "Failed to add {} to trusted peers of {}: {}",
                failure.source, failure.target, failure.error
            );
        }
        report
    }
}
