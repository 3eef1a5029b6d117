//! peering-daemon: Resolves and propagates p2p identities of cluster nodes.
//!
//! Watches StatefulSets for readiness, resolves each ready node's multiaddress
//! through `kubectl exec`, and shares it with the rest of its peer group.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use peering_core::{Controller, MultiAddrRegistry, RetryPolicy, RetryQueue, TimeoutResolver};
use peering_daemon::{JsonFileCache, KubectlResolver, StatefulSetWatcher};

#[derive(Parser, Debug)]
#[command(name = "peering-daemon")]
#[command(about = "Peer identity resolution and propagation controller")]
struct Args {
    /// Path to the mutual peers YAML file
    #[arg(short, long, env = "PEERING_CONFIG", default_value = "/etc/peering/config.yaml")]
    config: PathBuf,

    /// Namespace of the workloads (defaults to "default")
    #[arg(short, long, env = "POD_NAMESPACE")]
    namespace: Option<String>,

    /// File holding resolved identities across restarts
    #[arg(long, env = "PEERING_CACHE_FILE", default_value = "/var/lib/peering/identities.json")]
    cache_file: PathBuf,

    /// kubectl binary used for exec and StatefulSet listing
    #[arg(long, default_value = "kubectl")]
    kubectl: String,

    /// Only workloads whose name starts with this prefix are resolved
    #[arg(long, default_value = "da")]
    node_prefix: String,

    /// Service name attached to registered multiaddresses
    #[arg(long, default_value = "torch")]
    service_name: String,

    /// Lifetime of a cached identity, in hours
    #[arg(long, default_value_t = 1000)]
    identity_ttl_hours: u64,

    /// Timeout for a single remote command, in seconds
    #[arg(long, default_value_t = 60)]
    exec_timeout_secs: u64,

    /// Seconds between queue drains
    #[arg(long, default_value_t = 5)]
    drain_interval_secs: u64,

    /// Retries before a node is abandoned
    #[arg(long, default_value_t = 5)]
    max_retries: u32,

    /// Nodes resolved at once per drain
    #[arg(long, default_value_t = 8)]
    concurrency: usize,

    /// Retry malformed identities instead of abandoning them
    #[arg(long)]
    retry_format_errors: bool,

    /// Seconds between StatefulSet polls
    #[arg(long, default_value_t = 10)]
    watch_interval_secs: u64,

    /// Queue every configured da node at startup
    #[arg(long)]
    seed: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

impl Args {
    fn identity_ttl(&self) -> Duration {
        Duration::from_secs(self.identity_ttl_hours.saturating_mul(3600))
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            drain_interval: Duration::from_secs(self.drain_interval_secs),
            concurrency: self.concurrency,
            retry_format_errors: self.retry_format_errors,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG, then LOG_LEVEL, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,peering_core=debug,peering_daemon=debug"
    } else {
        "info,peering_core=info,peering_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_from_env("LOG_LEVEL"))
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting peering-daemon");
    let namespace = peering_daemon::namespace_or_default(args.namespace.clone());
    info!("Namespace: {}", namespace);

    let config = Arc::new(peering_daemon::load_peers(&args.config, &namespace)?);
    let cache = Arc::new(
        JsonFileCache::open(&args.cache_file)
            .await
            .context("Failed to open identity cache")?,
    );
    let kubectl = KubectlResolver::new(&args.kubectl);
    let resolver = Arc::new(TimeoutResolver::new(
        kubectl.clone(),
        Duration::from_secs(args.exec_timeout_secs),
    ));
    let metrics = Arc::new(MultiAddrRegistry::new(&args.service_name));
    let cancel = CancellationToken::new();

    let controller = Arc::new(
        Controller::new(config, cache, resolver, metrics.clone())
            .with_node_prefix(&args.node_prefix)
            .with_identity_ttl(args.identity_ttl())
            .with_cancellation(cancel.clone()),
    );
    let (queue, handle) = RetryQueue::new(controller.clone(), args.retry_policy());

    if args.seed {
        let seeded = controller.seed(&handle);
        info!("Seeded queue with {} node(s)", seeded);
    }

    let queue_task = tokio::spawn(queue.run(cancel.clone()));

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let watcher = StatefulSetWatcher::new(
        kubectl,
        namespace,
        Duration::from_secs(args.watch_interval_secs),
    );
    let watcher_task = tokio::spawn(watcher.run(event_tx, cancel.clone()));

    info!("Controller running. Press Ctrl+C to stop.");

    // Main event loop
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                controller.on_workload_event(&handle, &event.node_name, event.ready);
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    cancel.cancel();
    let (queue_result, watcher_result) = tokio::join!(queue_task, watcher_task);
    if let Err(e) = queue_result {
        error!("Queue task failed: {}", e);
    }
    if let Err(e) = watcher_result {
        error!("Watcher task failed: {}", e);
    }

    info!("Shutting down ({} multiaddress(es) registered)", metrics.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_ttl_saturates() {
        let args = Args::parse_from(["peering-daemon", "--identity-ttl-hours", &u64::MAX.to_string()]);

        assert_eq!(args.identity_ttl(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["peering-daemon"]);

        assert_eq!(args.identity_ttl(), Duration::from_secs(1000 * 3600));
        assert_eq!(args.retry_policy().max_retries, 5);
        assert!(!args.retry_policy().retry_format_errors);
    }
}
