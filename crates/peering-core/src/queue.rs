//! Retry Work Queue.
//!
//! Discovery pushes peers through a `QueueHandle` (an unbounded channel, so the
//! discovery path never blocks). Each drain pulls whatever has arrived, then
//! dispatches every item whose next attempt is due. Failed items go back with
//! exponential backoff until `max_retries` is reached.
//!
//! Pending items are indexed by node name, so each node has at most one pending
//! entry and a node is never dispatched twice in the same drain. A drain
//! completes all of its dispatches before the next one starts.

use crate::error::ResolveError;
use crate::peer::Peer;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Processes one work item.
#[async_trait]
pub trait WorkHandler: Send + Sync + 'static {
    async fn handle(&self, peer: &Peer) -> Result<(), ResolveError>;
}

/// Retry and scheduling knobs.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Retries after the first attempt before an item is abandoned
    pub max_retries: u32,
    /// Period between drains
    pub drain_interval: Duration,
    /// Items processed at once within a drain
    pub concurrency: usize,
    /// Retry format errors like transient ones instead of abandoning
    pub retry_format_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            max_retries: 5,
            drain_interval: Duration::from_secs(5),
            concurrency: 8,
            retry_format_errors: false,
        }
    }
}

/// Delay before retry number `attempt` (1-based).
pub fn calculate_backoff(attempt: u32, policy: &RetryPolicy) -> Duration {
    let delay_secs = policy.initial_delay.as_secs_f64()
        * policy.backoff_factor.powi(attempt.saturating_sub(1) as i32);

    Duration::from_secs_f64(delay_secs.min(policy.max_delay.as_secs_f64()))
}

/// Outcome of one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub succeeded: Vec<String>,
    pub retried: Vec<String>,
    pub abandoned: Vec<String>,
}

impl DrainReport {
    pub fn is_empty(&self) -> bool {
        self.succeeded.is_empty() && self.retried.is_empty() && self.abandoned.is_empty()
    }

    fn absorb(&self, stats: &mut QueueStats) {
        stats.succeeded += self.succeeded.len() as u64;
        stats.retried += self.retried.len() as u64;
        stats.abandoned += self.abandoned.len() as u64;
    }
}

/// Cumulative counters since the queue was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub attempts: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub abandoned: u64,
}

/// Cloneable producer side of the queue.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<Peer>,
}

impl QueueHandle {
    /// Queue a freshly discovered peer for immediate resolution.
    ///
    /// Resets the retry count and replaces any pending retry for the same node.
    pub fn enqueue(&self, mut peer: Peer) -> bool {
        peer.retry_count = 0;
        let node = peer.node_name.clone();
        match self.tx.send(peer) {
            Ok(()) => {
                debug!("Enqueued {}", node);
                true
            }
            Err(_) => {
                warn!("Queue closed, dropping {}", node);
                false
            }
        }
    }
}

type Slot = (Instant, u64);

/// Delay queue drained on a fixed interval.
pub struct RetryQueue<H> {
    handler: Arc<H>,
    policy: RetryPolicy,
    rx: mpsc::UnboundedReceiver<Peer>,
    pending: BTreeMap<Slot, Peer>,
    index: HashMap<String, Slot>,
    seq: u64,
    stats: QueueStats,
    cancel: CancellationToken,
}

impl<H: WorkHandler> RetryQueue<H> {
    pub fn new(handler: Arc<H>, policy: RetryPolicy) -> (Self, QueueHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            handler,
            policy,
            rx,
            pending: BTreeMap::new(),
            index: HashMap::new(),
            seq: 0,
            stats: QueueStats::default(),
            cancel: CancellationToken::new(),
        };
        (queue, QueueHandle { tx })
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Retry count of a pending node, if it is pending.
    pub fn pending_retry_count(&self, node_name: &str) -> Option<u32> {
        self.index
            .get(node_name)
            .and_then(|slot| self.pending.get(slot))
            .map(|p| p.retry_count)
    }

    /// Drain on every tick until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        self.cancel = cancel;
        let mut ticker = tokio::time::interval(self.policy.drain_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Retry queue running (interval {:?}, max retries {})",
            self.policy.drain_interval, self.policy.max_retries
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Retry queue stopping with {} pending", self.pending.len());
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.drain_once().await;
                    if !report.is_empty() {
                        info!(
                            "Drain: {} succeeded, {} retrying, {} abandoned",
                            report.succeeded.len(),
                            report.retried.len(),
                            report.abandoned.len()
                        );
                    }
                }
            }
        }
    }

    /// Pull new arrivals and process every due item.
    pub async fn drain_once(&mut self) -> DrainReport {
        self.pull_arrivals();

        let now = Instant::now();
        let due = self.take_due(now);
        let mut report = DrainReport::default();
        if due.is_empty() {
            return report;
        }

        let semaphore = Arc::new(Semaphore::new(self.policy.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut in_flight = HashMap::new();
        for peer in due {
            let handler = self.handler.clone();
            let semaphore = semaphore.clone();
            self.stats.attempts += 1;
            let item = peer.clone();
            let task = tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = handler.handle(&peer).await;
                (peer, result)
            });
            in_flight.insert(task.id(), item);
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tasks.abort_all();
                    while let Some(joined) = tasks.join_next_with_id().await {
                        self.joined(joined, &mut in_flight, &mut report);
                    }
                    break;
                }
                joined = tasks.join_next_with_id() => match joined {
                    None => break,
                    Some(joined) => self.joined(joined, &mut in_flight, &mut report),
                },
            }
        }

        // Items interrupted by cancellation keep their slot for the next run
        let now = Instant::now();
        for peer in in_flight.into_values() {
            debug!("Requeueing interrupted {}", peer.node_name);
            self.schedule(peer, now);
        }

        report.absorb(&mut self.stats);
        report
    }

    fn joined(
        &mut self,
        joined: Result<(task::Id, (Peer, Result<(), ResolveError>)), JoinError>,
        in_flight: &mut HashMap<task::Id, Peer>,
        report: &mut DrainReport,
    ) {
        match joined {
            Ok((id, (peer, result))) => {
                in_flight.remove(&id);
                self.settle(peer, result, report);
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                if let Some(peer) = in_flight.remove(&e.id()) {
                    error!("Work item {} failed: {}", peer.node_name, e);
                    report.abandoned.push(peer.node_name);
                }
            }
        }
    }

    fn pull_arrivals(&mut self) {
        let now = Instant::now();
        while let Ok(peer) = self.rx.try_recv() {
            self.stats.enqueued += 1;
            self.schedule(peer, now);
        }
    }

    fn take_due(&mut self, now: Instant) -> Vec<Peer> {
        let later = self.pending.split_off(&(now, u64::MAX));
        let due = std::mem::replace(&mut self.pending, later);
        due.into_values()
            .inspect(|p| {
                self.index.remove(&p.node_name);
            })
            .collect()
    }

    /// Place a peer in the delay queue, replacing its pending entry if any.
    fn schedule(&mut self, peer: Peer, at: Instant) {
        if let Some(old) = self.index.remove(&peer.node_name) {
            self.pending.remove(&old);
        }
        self.seq += 1;
        let slot = (at, self.seq);
        self.index.insert(peer.node_name.clone(), slot);
        self.pending.insert(slot, peer);
    }

    fn settle(&mut self, mut peer: Peer, result: Result<(), ResolveError>, report: &mut DrainReport) {
        let node = peer.node_name.clone();
        let err = match result {
            Ok(()) => {
                debug!("Resolved {}", node);
                report.succeeded.push(node);
                return;
            }
            Err(e) => e,
        };

        if matches!(err, ResolveError::Cancelled) {
            self.schedule(peer, Instant::now());
            return;
        }
        if err.is_format() && !self.policy.retry_format_errors {
            error!("Abandoning {}: {}", node, err);
            report.abandoned.push(node);
            return;
        }
        if peer.retry_count >= self.policy.max_retries {
            warn!(
                "Abandoning {} after {} retries: {}",
                node, peer.retry_count, err
            );
            report.abandoned.push(node);
            return;
        }

        peer.retry_count += 1;
        let delay = calculate_backoff(peer.retry_count, &self.policy);
        warn!(
            "Resolving {} failed (retry {}/{} in {:?}): {}",
            node, peer.retry_count, self.policy.max_retries, delay, err
        );
        self.schedule(peer, Instant::now() + delay);
        report.retried.push(node);
    }
}
