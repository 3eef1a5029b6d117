//! Scripted collaborators for tests.

use crate::commands::RemoteCommand;
use crate::error::ExecError;
use crate::resolver::{ExecRequest, RemoteResolver};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// A well-formed 52 character peer identifier.
pub const SAMPLE_ID: &str = "12D3KooWH1pTTJR5NXPYs2huVcJ9srmmiyGU4txHm2qgdaUVPYAw";

#[derive(Default)]
struct Script {
    peer_ids: HashMap<String, String>,
    ips: HashMap<String, String>,
    failures: HashMap<String, (ExecError, Option<usize>)>,
    command_failures: HashMap<(String, &'static str), ExecError>,
    delays: HashMap<String, Duration>,
    written: HashMap<String, String>,
    appended: HashMap<String, Vec<String>>,
    calls: Vec<ExecRequest>,
}

/// In-memory `RemoteResolver` that answers from a script and records every call.
///
/// Unscripted probes fail with a non-zero exit; file writes echo their content.
#[derive(Default)]
pub struct FakeResolver {
    script: Mutex<Script>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Script) -> T) -> T {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut script)
    }

    /// Raw output of the peer-info probe for a node.
    pub fn peer_id(&self, node: &str, id: &str) {
        self.with(|s| s.peer_ids.insert(node.to_string(), id.to_string()));
    }

    /// Raw output of the IP probe for a node.
    pub fn ip(&self, node: &str, ip: &str) {
        self.with(|s| s.ips.insert(node.to_string(), ip.to_string()));
    }

    /// Fail every command on a node.
    pub fn fail(&self, node: &str, error: ExecError) {
        self.with(|s| s.failures.insert(node.to_string(), (error, None)));
    }

    /// Fail the next `times` commands on a node, then answer normally.
    pub fn fail_times(&self, node: &str, times: usize, error: ExecError) {
        self.with(|s| s.failures.insert(node.to_string(), (error, Some(times))));
    }

    /// Fail one kind of command on a node.
    pub fn fail_command(&self, node: &str, command: &'static str, error: ExecError) {
        self.with(|s| s.command_failures.insert((node.to_string(), command), error));
    }

    /// Delay every command on a node.
    pub fn delay(&self, node: &str, delay: Duration) {
        self.with(|s| s.delays.insert(node.to_string(), delay));
    }

    /// Last content written to a node's files.
    pub fn written(&self, node: &str) -> Option<String> {
        self.with(|s| s.written.get(node).cloned())
    }

    /// Addresses appended to a node's trusted-peer list, in call order.
    pub fn appended(&self, node: &str) -> Vec<String> {
        self.with(|s| s.appended.get(node).cloned().unwrap_or_default())
    }

    pub fn calls(&self) -> Vec<ExecRequest> {
        self.with(|s| s.calls.clone())
    }

    pub fn call_count(&self) -> usize {
        self.with(|s| s.calls.len())
    }

    pub fn calls_for(&self, node: &str) -> usize {
        self.with(|s| s.calls.iter().filter(|c| c.node_name == node).count())
    }

    pub fn calls_of(&self, node: &str, command: &str) -> usize {
        self.with(|s| {
            s.calls
                .iter()
                .filter(|c| c.node_name == node && c.command.name() == command)
                .count()
        })
    }

    fn answer(&self, request: &ExecRequest) -> Result<String, ExecError> {
        self.with(|s| {
            s.calls.push(request.clone());
            let node = request.node_name.as_str();

            if let Some((error, remaining)) = s.failures.get_mut(node) {
                match remaining {
                    None => return Err(error.clone()),
                    Some(0) => {}
                    Some(n) => {
                        *n -= 1;
                        return Err(error.clone());
                    }
                }
            }
            if let Some(error) = s.command_failures.get(&(node.to_string(), request.command.name())) {
                return Err(error.clone());
            }

            let unscripted = || ExecError::CommandFailed {
                code: Some(1),
                stderr: format!("nothing scripted for {node}"),
            };
            match &request.command {
                RemoteCommand::PeerInfo => s.peer_ids.get(node).cloned().ok_or_else(unscripted),
                RemoteCommand::NodeIp => s.ips.get(node).cloned().ok_or_else(unscripted),
                RemoteCommand::WriteFile { content, .. } => {
                    s.written.insert(node.to_string(), content.clone());
                    Ok(content.clone())
                }
                RemoteCommand::EnvVarFile { .. } => Ok(String::new()),
                RemoteCommand::AppendTrustedPeer { address, .. } => {
                    let list = s.appended.entry(node.to_string()).or_default();
                    list.push(address.clone());
                    Ok(list.join(","))
                }
            }
        })
    }
}

#[async_trait]
impl RemoteResolver for FakeResolver {
    async fn execute(&self, request: &ExecRequest) -> Result<String, ExecError> {
        let delay = self.with(|s| s.delays.get(&request.node_name).copied());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.answer(request)
    }
}
