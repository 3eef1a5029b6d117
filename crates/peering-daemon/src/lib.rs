//! peering-daemon library: Cluster adapters for the peering engine.
//!
//! Exposes the daemon components so integration tests can drive them
//! without a cluster.

pub mod config;
pub mod file_cache;
pub mod kubectl;
pub mod watcher;

pub use config::{load_peers, namespace_or_default, parse_peers};
pub use file_cache::JsonFileCache;
pub use kubectl::KubectlResolver;
pub use watcher::{StatefulSetSource, StatefulSetStatus, StatefulSetWatcher, WorkloadEvent};
