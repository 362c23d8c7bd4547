//! Fan-out of decoded task events to subscribers.
//!
//! Each dispatch works on a snapshot of the subscriber set, so subscribers
//! may subscribe or unsubscribe (themselves included) from inside a callback.
//! A failing subscriber, whether it returns `Err` or panics, is logged and
//! skipped; the remaining subscribers still receive the event.

use crate::message::{decode, ServerMessage, TaskEvent};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Consumer of task events.
pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, event: &TaskEvent) -> anyhow::Result<()>;
}

impl<F> EventSubscriber for F
where
    F: Fn(&TaskEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &TaskEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Forwards events into a bounded tokio channel.
///
/// A full or closed channel counts as a subscriber failure.
pub struct ChannelSubscriber {
    tx: mpsc::Sender<TaskEvent>,
}

impl ChannelSubscriber {
    pub fn new(tx: mpsc::Sender<TaskEvent>) -> Self {
        Self { tx }
    }
}

impl EventSubscriber for ChannelSubscriber {
    fn on_event(&self, event: &TaskEvent) -> anyhow::Result<()> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => anyhow::anyhow!("subscriber channel full"),
            mpsc::error::TrySendError::Closed(_) => anyhow::anyhow!("subscriber channel closed"),
        })
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

type Entry = (SubscriberId, Arc<dyn EventSubscriber>);

/// Identity-unique set of subscribers.
#[derive(Default)]
struct SubscriberSet {
    next_id: u64,
    entries: Vec<Entry>,
}

impl SubscriberSet {
    fn insert(&mut self, subscriber: Arc<dyn EventSubscriber>) -> SubscriberId {
        // Same allocation registered twice -> same registration.
        let ptr = Arc::as_ptr(&subscriber) as *const ();
        if let Some((id, _)) = self
            .entries
            .iter()
            .find(|(_, existing)| Arc::as_ptr(existing) as *const () == ptr)
        {
            return *id;
        }

        self.next_id += 1;
        let id = SubscriberId(self.next_id);
        self.entries.push((id, subscriber));
        id
    }

    fn remove(&mut self, id: SubscriberId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| *existing != id);
        self.entries.len() != before
    }
}

/// Result of routing one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// Frame could not be decoded; nothing was dispatched.
    Dropped,
    /// Heartbeat acknowledgment; nothing was dispatched.
    Pong,
    /// Event handed to every subscriber in the snapshot.
    Dispatched(DispatchReport),
}

/// Per-dispatch delivery counts.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub event: TaskEvent,
    pub delivered: usize,
    pub failed: usize,
}

/// Message router owning the subscriber set.
#[derive(Default)]
pub struct MessageRouter {
    subscribers: Mutex<SubscriberSet>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) -> SubscriberId {
        let id = self.subscribers.lock().insert(subscriber);
        debug!(subscriber_id = %id, "Subscriber added");
        id
    }

    /// Returns whether `id` was registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.lock().remove(id);
        if removed {
            debug!(subscriber_id = %id, "Subscriber removed");
        }
        removed
    }

    pub fn clear(&self) {
        self.subscribers.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode `text` and dispatch it. Never panics on bad input.
    pub fn route(&self, text: &str) -> RouteOutcome {
        match decode(text) {
            Ok(ServerMessage::Pong) => {
                debug!("Received application-level pong");
                RouteOutcome::Pong
            }
            Ok(ServerMessage::Task(event)) => {
                let report = self.dispatch(event);
                RouteOutcome::Dispatched(report)
            }
            Err(e) => {
                warn!(error = %e, len = text.len(), "Dropping undecodable frame");
                RouteOutcome::Dropped
            }
        }
    }

    /// Deliver `event` to a snapshot of the current subscribers.
    pub fn dispatch(&self, event: TaskEvent) -> DispatchReport {
        let snapshot: Vec<Entry> = self.subscribers.lock().entries.clone();

        let mut delivered = 0;
        let mut failed = 0;

        for (id, subscriber) in &snapshot {
            match catch_unwind(AssertUnwindSafe(|| subscriber.on_event(&event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    failed += 1;
                    error!(subscriber_id = %id, kind = %event.kind, error = %e, "Subscriber failed");
                }
                Err(panic_payload) => {
                    failed += 1;
                    let msg = panic_message(panic_payload.as_ref());
                    error!(subscriber_id = %id, kind = %event.kind, panic = %msg, "Subscriber panicked");
                }
            }
        }

        debug!(kind = %event.kind, task_id = event.task_id(), delivered, failed, "Event dispatched");

        DispatchReport {
            event,
            delivered,
            failed,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
