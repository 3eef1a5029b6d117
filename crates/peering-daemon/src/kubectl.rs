//! `kubectl`-backed remote execution and StatefulSet listing.

use anyhow::{Context, Result};
use async_trait::async_trait;
use peering_core::{ExecError, ExecRequest, RemoteResolver};
use serde::Deserialize;
use std::process::Output;
use tokio::process::Command;
use tracing::debug;

use crate::watcher::{StatefulSetSource, StatefulSetStatus};

/// Runs commands in pods through the `kubectl` binary.
#[derive(Debug, Clone)]
pub struct KubectlResolver {
    binary: String,
}

impl KubectlResolver {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Arguments for `kubectl exec` of one request.
    pub fn exec_args(request: &ExecRequest) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            "-n".to_string(),
            request.namespace.clone(),
            request.node_name.clone(),
            "-c".to_string(),
            request.container.clone(),
            "--".to_string(),
        ];
        args.extend(request.argv());
        args
    }

    async fn run(&self, args: &[String]) -> Result<Output, ExecError> {
        Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExecError::Transport(format!("{}: {}", self.binary, e)))
    }
}

impl Default for KubectlResolver {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

#[async_trait]
impl RemoteResolver for KubectlResolver {
    async fn execute(&self, request: &ExecRequest) -> Result<String, ExecError> {
        debug!(
            "kubectl exec {} on {}/{}",
            request.command.name(),
            request.node_name,
            request.container
        );
        let output = self.run(&Self::exec_args(request)).await?;
        if !output.status.success() {
            return Err(ExecError::CommandFailed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl StatefulSetSource for KubectlResolver {
    async fn list(&self, namespace: &str) -> Result<Vec<StatefulSetStatus>> {
        let args: Vec<String> = ["get", "statefulsets", "-n", namespace, "-o", "json"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let output = self.run(&args).await?;
        if !output.status.success() {
            anyhow::bail!(
                "kubectl get statefulsets failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        parse_statefulsets(&String::from_utf8_lossy(&output.stdout))
    }
}

#[derive(Deserialize)]
struct StatefulSetList {
    #[serde(default)]
    items: Vec<StatefulSetItem>,
}

#[derive(Deserialize)]
struct StatefulSetItem {
    metadata: Metadata,
    #[serde(default)]
    status: Status,
}

#[derive(Deserialize)]
struct Metadata {
    name: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Status {
    #[serde(default)]
    replicas: i32,
    #[serde(default)]
    ready_replicas: i32,
    #[serde(default)]
    current_replicas: i32,
}

/// Parse the output of `kubectl get statefulsets -o json`.
pub fn parse_statefulsets(json: &str) -> Result<Vec<StatefulSetStatus>> {
    let list: StatefulSetList =
        serde_json::from_str(json).context("Failed to parse StatefulSet list")?;
    Ok(list
        .items
        .into_iter()
        .map(|item| StatefulSetStatus {
            name: item.metadata.name,
            replicas: item.status.replicas,
            ready_replicas: item.status.ready_replicas,
            current_replicas: item.status.current_replicas,
        })
        .collect())
}
