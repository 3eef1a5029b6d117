//! StatefulSet readiness watcher.
//!
//! Polls the StatefulSets of a namespace and emits an event whenever the
//! readiness of one flips. Workloads are assumed not ready until first seen.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Observed replica counts of one StatefulSet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatefulSetStatus {
    pub name: String,
    pub replicas: i32,
    pub ready_replicas: i32,
    pub current_replicas: i32,
}

impl StatefulSetStatus {
    pub fn is_ready(&self) -> bool {
        self.current_replicas > 0 && self.replicas == self.ready_replicas
    }

    /// Name of the first pod of the set.
    pub fn pod_name(&self) -> String {
        format!("{}-0", self.name)
    }
}

/// Readiness change of a workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadEvent {
    pub node_name: String,
    pub ready: bool,
}

/// Lists StatefulSets of a namespace.
#[async_trait]
pub trait StatefulSetSource: Send + Sync {
    async fn list(&self, namespace: &str) -> Result<Vec<StatefulSetStatus>>;
}

#[async_trait]
impl<T: StatefulSetSource + ?Sized> StatefulSetSource for std::sync::Arc<T> {
    async fn list(&self, namespace: &str) -> Result<Vec<StatefulSetStatus>> {
        (**self).list(namespace).await
    }
}

pub struct StatefulSetWatcher<S> {
    source: S,
    namespace: String,
    interval: Duration,
    known: HashMap<String, bool>,
}

impl<S: StatefulSetSource> StatefulSetWatcher<S> {
    pub fn new(source: S, namespace: impl Into<String>, interval: Duration) -> Self {
        Self {
            source,
            namespace: namespace.into(),
            interval,
            known: HashMap::new(),
        }
    }

    /// List once and return the readiness transitions since the last poll.
    pub async fn poll_once(&mut self) -> Result<Vec<WorkloadEvent>> {
        let sets = self.source.list(&self.namespace).await?;
        let mut events = Vec::new();
        for set in sets {
            let ready = set.is_ready();
            let node_name = set.pod_name();
            let was_ready = self.known.insert(node_name.clone(), ready).unwrap_or(false);
            if ready != was_ready {
                debug!("{} readiness {} -> {}", node_name, was_ready, ready);
                events.push(WorkloadEvent { node_name, ready });
            }
        }
        Ok(events)
    }

    /// Poll until cancelled or the receiver goes away.
    pub async fn run(mut self, tx: mpsc::UnboundedSender<WorkloadEvent>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Watching StatefulSets in {} every {:?}",
            self.namespace, self.interval
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let events = match self.poll_once().await {
                        Ok(events) => events,
                        Err(e) => {
                            warn!("Failed to list StatefulSets: {:#}", e);
                            continue;
                        }
                    };
                    for event in events {
                        if tx.send(event).is_err() {
                            // Receiver dropped
                            return;
                        }
                    }
                }
            }
        }
        debug!("StatefulSet watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedSource {
        polls: Mutex<Vec<Vec<StatefulSetStatus>>>,
    }

    impl ScriptedSource {
        fn push(&self, sets: Vec<StatefulSetStatus>) {
            self.polls.lock().unwrap().insert(0, sets);
        }
    }

    #[async_trait]
    impl StatefulSetSource for ScriptedSource {
        async fn list(&self, _namespace: &str) -> Result<Vec<StatefulSetStatus>> {
            self.polls
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| anyhow::anyhow!("api server unavailable"))
        }
    }

    fn set(name: &str, ready: i32) -> StatefulSetStatus {
        StatefulSetStatus {
            name: name.into(),
            replicas: 1,
            ready_replicas: ready,
            current_replicas: 1,
        }
    }

    #[test]
    fn test_readiness_rule() {
        assert!(set("da-bridge-1", 1).is_ready());
        assert!(!set("da-bridge-1", 0).is_ready());
        let scaled_down = StatefulSetStatus {
            current_replicas: 0,
            ..set("da-bridge-1", 1)
        };
        assert!(!scaled_down.is_ready());
        assert_eq!(set("da-bridge-1", 1).pod_name(), "da-bridge-1-0");
    }

    #[tokio::test]
    async fn test_emits_transitions_only() {
        let source = ScriptedSource::default();
        source.push(vec![set("da-bridge-1", 0), set("da-bridge-2", 1)]);
        source.push(vec![set("da-bridge-1", 1), set("da-bridge-2", 1)]);
        source.push(vec![set("da-bridge-1", 1), set("da-bridge-2", 0)]);
        let mut watcher = StatefulSetWatcher::new(source, "default", Duration::from_secs(10));

        let first = watcher.poll_once().await.unwrap();
        assert_eq!(
            first,
            vec![WorkloadEvent {
                node_name: "da-bridge-2-0".into(),
                ready: true
            }]
        );

        let second = watcher.poll_once().await.unwrap();
        assert_eq!(
            second,
            vec![WorkloadEvent {
                node_name: "da-bridge-1-0".into(),
                ready: true
            }]
        );

        let third = watcher.poll_once().await.unwrap();
        assert_eq!(
            third,
            vec![WorkloadEvent {
                node_name: "da-bridge-2-0".into(),
                ready: false
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_forwards_events_and_survives_errors() {
        let source = ScriptedSource::default();
        source.push(vec![set("da-bridge-1", 1)]);
        let watcher = StatefulSetWatcher::new(source, "default", Duration::from_secs(10));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(watcher.run(tx, cancel.clone()));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.node_name, "da-bridge-1-0");

        // Later polls fail; the loop keeps going until cancelled
        tokio::time::sleep(Duration::from_secs(35)).await;
        cancel.cancel();
        task.await.unwrap();
    }
}
