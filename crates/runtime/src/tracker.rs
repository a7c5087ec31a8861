//! The combined state-tracking bus consumer.
//!
//! Drives the conversation and message trackers from a single bus
//! subscription and runs their garbage collection on an interval.
//! Transitions and delta accumulation are synchronous — they complete
//! within one scheduling turn, preserving per-conversation event order.

use chrono::{Duration, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use vitalis_core::event::{Envelope, EventBus};

use crate::conversation::ConversationTracker;
use crate::message::MessageTracker;

/// Owns both trackers behind one lock so a single envelope updates both
/// views atomically with respect to readers.
pub struct StateTracker {
    pub conversations: ConversationTracker,
    pub messages: MessageTracker,
}

impl StateTracker {
    pub fn new(tool_record_grace: Duration, conversation_grace: Duration) -> Self {
        Self {
            conversations: ConversationTracker::new(tool_record_grace, conversation_grace),
            messages: MessageTracker::new(),
        }
    }

    /// Fold one envelope into both trackers.
    pub fn observe(&mut self, envelope: &Envelope) {
        self.conversations.observe(envelope);
        self.messages.observe(envelope);
    }

    /// Garbage-collect expired tool records and settled conversations,
    /// cascading message eviction.
    pub fn sweep(&mut self, now: chrono::DateTime<Utc>) {
        for evicted in self.conversations.sweep(now) {
            self.messages.evict_conversation(&evicted);
        }
    }

    /// Subscribe to the bus and drive the trackers until the bus closes.
    /// Returns the shared tracker handle and the consumer task.
    pub fn spawn(
        bus: &EventBus,
        tool_record_grace: Duration,
        conversation_grace: Duration,
        sweep_interval: std::time::Duration,
    ) -> (Arc<Mutex<StateTracker>>, tokio::task::JoinHandle<()>) {
        let tracker = Arc::new(Mutex::new(StateTracker::new(
            tool_record_grace,
            conversation_grace,
        )));
        let handle = tracker.clone();
        let mut rx = bus.subscribe();

        let task = tokio::spawn(async move {
            let mut sweep = tokio::time::interval(sweep_interval);
            sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Ok(envelope) => handle.lock().unwrap().observe(&envelope),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "state tracker lagged behind the event bus");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = sweep.tick() => handle.lock().unwrap().sweep(Utc::now()),
                }
            }
        });

        (tracker, task)
    }
}
