//! Remote command execution against running workloads.

use crate::commands::RemoteCommand;
use crate::error::ExecError;
use crate::peer::Peer;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Default bound on a single remote execution.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(60);

/// One command aimed at one container of one workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub node_name: String,
    pub container: String,
    pub namespace: String,
    pub command: RemoteCommand,
}

impl ExecRequest {
    /// Run in the node's main container.
    pub fn main(peer: &Peer, command: RemoteCommand) -> Self {
        Self {
            node_name: peer.node_name.clone(),
            container: peer.container_name.clone(),
            namespace: peer.namespace.clone(),
            command,
        }
    }

    /// Run in the node's setup container.
    pub fn setup(peer: &Peer, command: RemoteCommand) -> Self {
        Self {
            node_name: peer.node_name.clone(),
            container: peer.container_setup_name.clone(),
            namespace: peer.namespace.clone(),
            command,
        }
    }

    pub fn argv(&self) -> Vec<String> {
        self.command.argv()
    }
}

/// Executes a command inside a workload and returns its stdout.
///
/// Both connection failures and non-zero exits surface as `Err`.
#[async_trait]
pub trait RemoteResolver: Send + Sync {
    async fn execute(&self, request: &ExecRequest) -> Result<String, ExecError>;
}

#[async_trait]
impl<T: RemoteResolver + ?Sized> RemoteResolver for std::sync::Arc<T> {
    async fn execute(&self, request: &ExecRequest) -> Result<String, ExecError> {
        (**self).execute(request).await
    }
}

/// Bounds every call of the wrapped resolver.
pub struct TimeoutResolver<R> {
    inner: R,
    timeout: Duration,
}

impl<R: RemoteResolver> TimeoutResolver<R> {
    pub fn new(inner: R, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn with_default_timeout(inner: R) -> Self {
        Self::new(inner, DEFAULT_EXEC_TIMEOUT)
    }
}

#[async_trait]
impl<R: RemoteResolver> RemoteResolver for TimeoutResolver<R> {
    async fn execute(&self, request: &ExecRequest) -> Result<String, ExecError> {
        match tokio::time::timeout(self.timeout, self.inner.execute(request)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(
                    "{} on {} timed out after {:?}",
                    request.command.name(),
                    request.node_name,
                    self.timeout
                );
                Err(ExecError::Timeout(self.timeout))
            }
        }
    }
}
