//! Failure monitor — one-shot watch on a node's terminal events.
//!
//! Each monitor moves `Watching → Dispatched → Done`. The first down-event
//! for its node runs every handler once, concurrently; the subscription is
//! cancelled at that point, so later events (even for a recreated node
//! with the same name) are never seen by this monitor. Handlers run on
//! their own tasks and outlive an abort of the monitor.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use hydra_runtime::{ContainerRuntime, EventFilter, EventSubscription, RuntimeEvent};

use crate::error::ClusterResult;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Called with the down-event that ended the watch.
pub type NodeDownHandler = Arc<dyn Fn(RuntimeEvent) -> BoxFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorPhase {
    Watching,
    Dispatched,
    Done,
}

/// Handle to a running monitor task.
pub struct MonitorHandle {
    node: String,
    phase: watch::Receiver<MonitorPhase>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn phase(&self) -> MonitorPhase {
        *self.phase.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop watching. Handlers already dispatched keep running to completion.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Wait until the monitor has run its handlers, or was aborted.
    pub async fn wait_done(&mut self) -> MonitorPhase {
        let _ = self.phase.wait_for(|p| *p == MonitorPhase::Done).await;
        *self.phase.borrow()
    }
}

/// Subscribe to `node`'s down-events and start watching.
///
/// The subscription is in place when this returns, so the node container
/// can be started afterwards without an unwatched window.
pub async fn watch_node<R: ContainerRuntime>(
    runtime: &R,
    node: &str,
    down_events: &[String],
    handlers: Vec<NodeDownHandler>,
) -> ClusterResult<MonitorHandle> {
    let filter = EventFilter::new(node, down_events);
    let subscription = runtime.subscribe(&filter).await?;
    let (phase_tx, phase_rx) = watch::channel(MonitorPhase::Watching);

    let task = tokio::spawn(run_monitor(subscription, filter, handlers, phase_tx));
    debug!(%node, events = ?down_events, "failure monitor started");

    Ok(MonitorHandle {
        node: node.to_string(),
        phase: phase_rx,
        task,
    })
}

async fn run_monitor(
    mut subscription: EventSubscription,
    filter: EventFilter,
    handlers: Vec<NodeDownHandler>,
    phase: watch::Sender<MonitorPhase>,
) {
    let node = filter.container.clone();

    let event = loop {
        match subscription.next().await {
            Some(event) if filter.matches(&event) => break Some(event),
            Some(_) => continue,
            None => break None,
        }
    };
    subscription.cancel();

    let Some(event) = event else {
        warn!(%node, "event stream closed before node went down, node is no longer monitored");
        phase.send_replace(MonitorPhase::Done);
        return;
    };

    info!(%node, action = %event.action, "node down detected");
    phase.send_replace(MonitorPhase::Dispatched);

    // Detached: aborting this task drops the handles, not the handlers.
    let dispatched: Vec<JoinHandle<()>> = handlers
        .iter()
        .map(|handler| tokio::spawn(handler(event.clone())))
        .collect();
    for handle in dispatched {
        if let Err(e) = handle.await {
            error!(%node, error = %e, "node-down handler panicked");
        }
    }

    phase.send_replace(MonitorPhase::Done);
    debug!(%node, "failure monitor exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use hydra_runtime::memory::MemoryRuntime;

    fn down_events() -> Vec<String> {
        ["destroy", "die", "kill", "stop"]
            .iter()
            .map(|e| e.to_string())
            .collect()
    }

    fn counting_handler(count: Arc<AtomicUsize>) -> NodeDownHandler {
        Arc::new(move |_event| {
            let count = count.clone();
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test]
    async fn first_down_event_dispatches_every_handler_once() {
        let runtime = MemoryRuntime::new();
        runtime.add_container("node-1.test", "docker:dind", &["test"]);
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let mut monitor = watch_node(
            &runtime,
            "node-1.test",
            &down_events(),
            vec![counting_handler(first.clone()), counting_handler(second.clone())],
        )
        .await
        .unwrap();
        assert_eq!(monitor.phase(), MonitorPhase::Watching);

        // Emits kill, die, stop, destroy: four matching events.
        runtime.stop_container("node-1.test");
        assert_eq!(monitor.wait_done().await, MonitorPhase::Done);

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn recreated_node_is_not_seen_after_dispatch() {
        let runtime = MemoryRuntime::new();
        runtime.add_container("node-1.test", "docker:dind", &["test"]);
        let count = Arc::new(AtomicUsize::new(0));

        let mut monitor = watch_node(
            &runtime,
            "node-1.test",
            &down_events(),
            vec![counting_handler(count.clone())],
        )
        .await
        .unwrap();

        runtime.stop_container("node-1.test");
        monitor.wait_done().await;

        runtime.add_container("node-1.test", "docker:dind", &["test"]);
        runtime.stop_container("node-1.test");
        tokio::task::yield_now().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn other_nodes_do_not_trigger() {
        let runtime = MemoryRuntime::new();
        runtime.add_container("node-1.test", "docker:dind", &["test"]);
        runtime.add_container("node-2.test", "docker:dind", &["test"]);
        let count = Arc::new(AtomicUsize::new(0));

        let monitor = watch_node(
            &runtime,
            "node-1.test",
            &down_events(),
            vec![counting_handler(count.clone())],
        )
        .await
        .unwrap();

        runtime.stop_container("node-2.test");
        tokio::task::yield_now().await;

        assert_eq!(monitor.phase(), MonitorPhase::Watching);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        monitor.abort();
    }

    #[tokio::test]
    async fn abort_after_dispatch_lets_handlers_finish() {
        let runtime = MemoryRuntime::new();
        runtime.add_container("node-1.test", "docker:dind", &["test"]);
        let count = Arc::new(AtomicUsize::new(0));
        let slow: NodeDownHandler = {
            let count = count.clone();
            Arc::new(move |_event| {
                let count = count.clone();
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    count.fetch_add(1, Ordering::SeqCst);
                })
            })
        };

        let mut monitor = watch_node(&runtime, "node-1.test", &down_events(), vec![slow])
            .await
            .unwrap();
        runtime.stop_container("node-1.test");
        monitor
            .phase
            .wait_for(|p| *p != MonitorPhase::Watching)
            .await
            .unwrap();

        monitor.abort();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn aborted_monitor_releases_subscription() {
        let runtime = MemoryRuntime::new();
        let mut monitor = watch_node(&runtime, "node-1.test", &down_events(), Vec::new())
            .await
            .unwrap();

        monitor.abort();
        monitor.wait_done().await;
        tokio::task::yield_now().await;
        assert_eq!(runtime.subscriber_count(), 0);
    }
}
