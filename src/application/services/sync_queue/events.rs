use crate::domain::entities::QueueItem;
use crate::domain::value_objects::{MutationType, QueueItemId};
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::error;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    Enqueued {
        id: QueueItemId,
        mutation_type: MutationType,
    },
    ProcessingStarted,
    ProcessingStopped,
    ItemProcessing {
        item: QueueItem,
    },
    ItemSuccess {
        item: QueueItem,
    },
    ItemRetry {
        item: QueueItem,
        retries: u32,
        next_retry: i64,
    },
    ItemFailed {
        item: QueueItem,
        error: String,
        reason: String,
    },
    QueueCleared {
        count: u64,
    },
}

impl QueueEvent {
    pub fn tag(&self) -> &'static str {
        match self {
            QueueEvent::Enqueued { .. } => "enqueued",
            QueueEvent::ProcessingStarted => "processing_started",
            QueueEvent::ProcessingStopped => "processing_stopped",
            QueueEvent::ItemProcessing { .. } => "item_processing",
            QueueEvent::ItemSuccess { .. } => "item_success",
            QueueEvent::ItemRetry { .. } => "item_retry",
            QueueEvent::ItemFailed { .. } => "item_failed",
            QueueEvent::QueueCleared { .. } => "queue_cleared",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&QueueEvent) + Send + Sync>;

/// Typed publish/subscribe channel for queue state changes.
#[derive(Default)]
pub struct QueueEventBus {
    next_id: AtomicU64,
    listeners: RwLock<HashMap<SubscriptionId, Listener>>,
}

impl QueueEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.insert(id, Arc::new(listener));
        }
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners
            .write()
            .map(|mut listeners| listeners.remove(&id).is_some())
            .unwrap_or(false)
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or(0)
    }

    /// Delivers `event` to every listener. A panicking listener is logged and
    /// does not affect the others.
    pub fn emit(&self, event: &QueueEvent) {
        let listeners: Vec<Listener> = match self.listeners.read() {
            Ok(listeners) => listeners.values().cloned().collect(),
            Err(_) => return,
        };
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!(target: "offline::queue", event = event.tag(), "queue listener panicked");
            }
        }
    }
}
