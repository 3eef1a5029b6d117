//! peering-core: Peer identity resolution and propagation for cluster-hosted nodes.
//!
//! This crate provides:
//! - The peer configuration model and multiaddress rules
//! - Address assembly for nodes with several upstream dependencies
//! - A retry work queue with bounded exponential backoff
//! - Fan-out of resolved addresses to every member of a peer group
//! - IdentityCache, RemoteResolver and MetricsRegistrar trait abstractions

pub mod assembler;
pub mod cache;
pub mod commands;
pub mod controller;
pub mod error;
pub mod metrics;
pub mod multiaddr;
pub mod peer;
pub mod propagator;
pub mod queue;
pub mod resolver;
pub mod testing;

pub use assembler::{AddressAssembler, Resolution};
pub use cache::{DEFAULT_IDENTITY_TTL, IdentityCache, InMemoryCache};
pub use commands::RemoteCommand;
pub use controller::Controller;
pub use error::{CacheError, ExecError, ResolveError};
pub use metrics::{MetricsRegistrar, MultiAddrInfo, MultiAddrRegistry};
pub use multiaddr::{ConnectionString, FormatError, Host, MultiAddress};
pub use peer::{ConfigError, MutualPeersConfig, NodeType, Peer, PeerGroup};
pub use propagator::{FanoutPropagator, PropagationReport};
pub use queue::{DrainReport, QueueHandle, QueueStats, RetryPolicy, RetryQueue, WorkHandler};
pub use resolver::{ExecRequest, RemoteResolver, TimeoutResolver};
