use crate::application::services::sync_queue::SyncQueue;
use crate::domain::entities::{ConnectivityEvent, ConnectivityState};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// External signals that start a processing cycle besides the timer.
#[derive(Default)]
pub struct QueueTriggers {
    /// Timer and enqueue triggers are skipped while this reports offline.
    pub connectivity: Option<watch::Receiver<ConnectivityState>>,
    /// "Became online" edges always start a cycle.
    pub edges: Option<broadcast::Receiver<ConnectivityEvent>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Timer,
    Enqueued,
    BecameOnline,
}

impl Trigger {
    fn as_str(&self) -> &'static str {
        match self {
            Trigger::Timer => "timer",
            Trigger::Enqueued => "enqueued",
            Trigger::BecameOnline => "became_online",
        }
    }
}

/// Background loop driving `SyncQueue::process_queue`. Holds only a weak
/// reference so dropping the queue ends the loop.
pub struct QueueProcessingJob;

impl QueueProcessingJob {
    pub fn spawn(
        queue: Weak<SyncQueue>,
        wakeup: Arc<Notify>,
        interval: Duration,
        triggers: QueueTriggers,
    ) -> JoinHandle<()> {
        tokio::spawn(Self::run(queue, wakeup, interval, triggers))
    }

    async fn run(
        queue: Weak<SyncQueue>,
        wakeup: Arc<Notify>,
        interval: Duration,
        triggers: QueueTriggers,
    ) {
        let QueueTriggers {
            connectivity,
            mut edges,
        } = triggers;

        // The first tick fires immediately, so a freshly started job drains
        // whatever is already due.
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let trigger = tokio::select! {
                _ = ticker.tick() => Some(Trigger::Timer),
                _ = wakeup.notified() => Some(Trigger::Enqueued),
                edge = next_online_edge(&mut edges) => edge.map(|_| Trigger::BecameOnline),
            };
            let Some(trigger) = trigger else {
                edges = None;
                continue;
            };

            if trigger != Trigger::BecameOnline && !is_online(connectivity.as_ref()) {
                debug!(target: "offline::queue", trigger = trigger.as_str(), "offline, skipping cycle");
                continue;
            }

            let Some(queue) = queue.upgrade() else {
                break;
            };
            if let Err(err) = queue.process_queue().await {
                warn!(
                    target: "offline::queue",
                    trigger = trigger.as_str(),
                    error = %err,
                    "processing cycle failed"
                );
            }
        }
    }
}

fn is_online(connectivity: Option<&watch::Receiver<ConnectivityState>>) -> bool {
    connectivity.map(|rx| rx.borrow().is_online).unwrap_or(true)
}

/// Resolves on the next "became online" edge; `None` once the channel closes.
async fn next_online_edge(
    edges: &mut Option<broadcast::Receiver<ConnectivityEvent>>,
) -> Option<()> {
    let Some(rx) = edges.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(ConnectivityEvent::BecameOnline { .. }) => return Some(()),
            Ok(_) => continue,
            // A dropped event may have been an edge.
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(target: "offline::queue", skipped, "connectivity events lagged");
                return Some(());
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
