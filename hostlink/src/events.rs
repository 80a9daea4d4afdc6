//! Event channel.
//!
//! The receive dispatcher enqueues raw event frames without blocking; a
//! single worker drains the queue in arrival order, decodes each record and
//! invokes the registered callbacks. Callbacks run on the worker, so a slow
//! one delays later events but never the dispatcher.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::bridge::envelope::Event;

/// Event frame as received, before decoding.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub interface: u8,
    pub payload: Bytes,
    pub received_at: Instant,
}

impl EventRecord {
    pub fn new(interface: u8, payload: Bytes) -> Self {
        Self {
            interface,
            payload,
            received_at: Instant::now(),
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<EventRecord>;
pub type EventReceiver = mpsc::UnboundedReceiver<EventRecord>;

/// Unbounded, ordered queue between the dispatcher and the event worker.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Returns `false` once the subscriber is gone and should be dropped.
type Callback = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Registered event callbacks, shared between the worker and registrants.
#[derive(Clone, Default)]
pub struct EventSubscribers {
    callbacks: Arc<RwLock<Vec<Callback>>>,
}

impl EventSubscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.push(Arc::new(move |event: &Event| {
            callback(event);
            true
        }));
    }

    /// Receive every subsequent event on a channel. The subscription is
    /// dropped on the first event after the receiver goes away.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(Arc::new(move |event: &Event| tx.send(event.clone()).is_ok()));
        rx
    }

    fn push(&self, callback: Callback) {
        let mut callbacks = self
            .callbacks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        callbacks.push(callback);
    }

    pub fn len(&self) -> usize {
        self.callbacks
            .read()
            .map(|callbacks| callbacks.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke callbacks in registration order. The lock is released first so
    /// a callback may register another.
    pub fn notify(&self, event: &Event) {
        let callbacks: Vec<Callback> = match self.callbacks.read() {
            Ok(callbacks) => callbacks.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let closed: Vec<Callback> = callbacks
            .into_iter()
            .filter(|callback| !callback(event))
            .collect();
        if closed.is_empty() {
            return;
        }

        let mut callbacks = self
            .callbacks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        callbacks.retain(|callback| !closed.iter().any(|dead| Arc::ptr_eq(callback, dead)));
        tracing::debug!(dropped = closed.len(), "Removed closed event subscribers");
    }
}

impl std::fmt::Debug for EventSubscribers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscribers")
            .field("callbacks", &self.len())
            .finish()
    }
}

/// Drain `records` until every sender is gone. Returns the number of events
/// delivered.
pub async fn run_event_worker(mut records: EventReceiver, subscribers: EventSubscribers) -> u64 {
    let mut delivered = 0;

    while let Some(record) = records.recv().await {
        match Event::decode(&record.payload) {
            Ok(event) => {
                tracing::debug!(
                    interface = record.interface,
                    ?event,
                    queued_for = ?record.received_at.elapsed(),
                    "Delivering event"
                );
                subscribers.notify(&event);
                delivered += 1;
            }
            Err(e) => {
                tracing::warn!(
                    interface = record.interface,
                    error = %e,
                    "Dropping undecodable event"
                );
            }
        }
    }

    tracing::debug!(delivered, "Event worker exiting");
    delivered
}
