//! Stream transport multiplexer.
//!
//! Maintains the registry of live subscriber handles, each bound to exactly
//! one conversation id. Bus envelopes are forwarded only to subscribers of
//! their conversation; an envelope without a conversation id (should not
//! occur in normal operation) is broadcast to all subscribers. A write
//! failure marks the subscriber dead; dead and idle subscribers are pruned
//! on the next heartbeat or broadcast pass.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use vitalis_core::conversation::{ConversationId, SubscriberId};
use vitalis_core::event::{Envelope, EventBus};

use crate::wire::WireFrame;

struct Subscriber {
    conversation_id: ConversationId,
    tx: mpsc::UnboundedSender<WireFrame>,
    last_active: Instant,
    dead: bool,
}

struct Registry {
    subscribers: HashMap<SubscriberId, Subscriber>,
}

/// Routes bus events to live per-conversation subscribers.
pub struct StreamMultiplexer {
    registry: Mutex<Registry>,
    idle_timeout: Duration,
    heartbeat_interval: Duration,
    pump: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl StreamMultiplexer {
    pub fn new(heartbeat_interval: Duration, idle_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(Registry {
                subscribers: HashMap::new(),
            }),
            idle_timeout,
            heartbeat_interval,
            pump: Mutex::new(None),
        })
    }

    /// Subscribe the multiplexer to the bus and start the heartbeat ticker.
    /// Idempotent per multiplexer: a second call replaces the previous
    /// subscription.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) {
        let this = self.clone();
        let mut rx = bus.subscribe();
        let interval = self.heartbeat_interval;
        let task = tokio::spawn(async move {
            // First heartbeat one full interval after attach, not at t=0.
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Ok(envelope) => this.deliver(&envelope),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "multiplexer lagged behind the event bus");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = ticker.tick() => this.heartbeat_pass(),
                }
            }
        });
        if let Some(previous) = self.pump.lock().unwrap().replace(task) {
            previous.abort();
        }
    }

    /// Register a live subscriber bound to one conversation. The receiver
    /// yields wire frames, starting with the `connected` frame.
    pub fn subscribe(
        &self,
        conversation_id: ConversationId,
    ) -> (SubscriberId, mpsc::UnboundedReceiver<WireFrame>) {
        let id = SubscriberId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(WireFrame::connected(&id, &conversation_id));

        info!(subscriber = %id, conversation = %conversation_id, "subscriber attached");
        self.registry.lock().unwrap().subscribers.insert(
            id.clone(),
            Subscriber {
                conversation_id,
                tx,
                last_active: Instant::now(),
                dead: false,
            },
        );
        (id, rx)
    }

    /// Forward one envelope to the subscribers it belongs to.
    pub fn deliver(&self, envelope: &Envelope) {
        let frame = WireFrame::from_envelope(envelope);
        let mut registry = self.registry.lock().unwrap();

        match &envelope.conversation_id {
            Some(conversation_id) => {
                for subscriber in registry
                    .subscribers
                    .values_mut()
                    .filter(|s| !s.dead && &s.conversation_id == conversation_id)
                {
                    subscriber.push(frame.clone());
                }
            }
            None => {
                // An unstamped event reaches everyone.
                warn!(kind = frame.event, "event without conversation id, broadcasting");
                for subscriber in registry.subscribers.values_mut() {
                    if !subscriber.dead {
                        subscriber.push(frame.clone());
                    }
                }
                registry.prune_dead();
            }
        }
    }

    /// Send heartbeats, close idle subscribers, and prune the dead.
    pub fn heartbeat_pass(&self) {
        let mut registry = self.registry.lock().unwrap();
        let idle_timeout = self.idle_timeout;
        for (id, subscriber) in registry.subscribers.iter_mut() {
            if subscriber.dead {
                continue;
            }
            if subscriber.last_active.elapsed() >= idle_timeout {
                debug!(subscriber = %id, "closing idle subscriber");
                subscriber.dead = true;
                continue;
            }
            // Heartbeats probe liveness but do not count as activity.
            if subscriber.tx.send(WireFrame::heartbeat()).is_err() {
                subscriber.dead = true;
            }
        }
        registry.prune_dead();
    }

    /// Close every subscriber and drop the bus subscription.
    pub fn close_all(&self) {
        self.registry.lock().unwrap().subscribers.clear();
        if let Some(task) = self.pump.lock().unwrap().take() {
            task.abort();
        }
        info!("multiplexer closed");
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().unwrap().subscribers.len()
    }
}

impl Subscriber {
    fn push(&mut self, frame: WireFrame) {
        if self.tx.send(frame).is_err() {
            self.dead = true;
        } else {
            self.last_active = Instant::now();
        }
    }
}

impl Registry {
    fn prune_dead(&mut self) {
        self.subscribers.retain(|id, s| {
            if s.dead {
                debug!(subscriber = %id, "pruning dead subscriber");
            }
            !s.dead
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vitalis_core::conversation::MessageId;
    use vitalis_core::event::TurnEvent;

    fn delta(conv: &str, text: &str) -> Envelope {
        Envelope::stamped(
            ConversationId::from(conv),
            TurnEvent::ContentDelta {
                message_id: MessageId::from("m1"),
                delta: text.into(),
                timestamp: Utc::now(),
            },
        )
    }

    fn mux() -> Arc<StreamMultiplexer> {
        StreamMultiplexer::new(Duration::from_secs(15), Duration::from_secs(300))
    }

    #[tokio::test]
    async fn connected_frame_arrives_first() {
        let mux = mux();
        let (id, mut rx) = mux.subscribe(ConversationId::from("c1"));
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.event, "connected");
        assert!(frame.data.contains(id.as_str()));
        assert!(frame.data.contains("c1"));
    }

    #[tokio::test]
    async fn events_route_only_to_bound_conversation() {
        let mux = mux();
        let (_, mut rx1) = mux.subscribe(ConversationId::from("c1"));
        let (_, mut rx2) = mux.subscribe(ConversationId::from("c2"));
        rx1.recv().await.unwrap(); // connected
        rx2.recv().await.unwrap(); // connected

        mux.deliver(&delta("c1", "for c1 only"));

        let frame = rx1.recv().await.unwrap();
        assert_eq!(frame.event, "content_delta");
        assert!(frame.data.contains("for c1 only"));
        assert!(rx2.try_recv().is_err(), "c2 must not receive c1 events");
    }

    #[tokio::test]
    async fn unstamped_event_broadcasts_to_all() {
        let mux = mux();
        let (_, mut rx1) = mux.subscribe(ConversationId::from("c1"));
        let (_, mut rx2) = mux.subscribe(ConversationId::from("c2"));
        rx1.recv().await.unwrap();
        rx2.recv().await.unwrap();

        mux.deliver(&Envelope {
            conversation_id: None,
            event: TurnEvent::ErrorOccurred {
                message: "apology".into(),
                timestamp: Utc::now(),
            },
        });

        assert_eq!(rx1.recv().await.unwrap().event, "error");
        assert_eq!(rx2.recv().await.unwrap().event, "error");
    }

    #[tokio::test]
    async fn dead_subscriber_is_pruned_without_affecting_others() {
        let mux = mux();
        let (_, rx1) = mux.subscribe(ConversationId::from("c1"));
        let (_, mut rx2) = mux.subscribe(ConversationId::from("c1"));
        drop(rx1); // client disconnected

        mux.deliver(&delta("c1", "still flowing"));
        mux.heartbeat_pass();

        assert_eq!(mux.subscriber_count(), 1);
        // The survivor got connected + delta (+ heartbeat).
        let frame = rx2.recv().await.unwrap();
        assert_eq!(frame.event, "connected");
        let frame = rx2.recv().await.unwrap();
        assert!(frame.data.contains("still flowing"));
    }

    #[tokio::test]
    async fn idle_subscriber_is_closed_on_heartbeat() {
        let mux = StreamMultiplexer::new(Duration::from_secs(15), Duration::from_millis(10));
        let (_, mut rx) = mux.subscribe(ConversationId::from("c1"));
        rx.recv().await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        mux.heartbeat_pass();

        assert_eq!(mux.subscriber_count(), 0);
        // Channel closed: receiver drains to None.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn heartbeats_flow_to_live_subscribers() {
        let mux = mux();
        let (_, mut rx) = mux.subscribe(ConversationId::from("c1"));
        rx.recv().await.unwrap();
        mux.heartbeat_pass();
        assert_eq!(rx.recv().await.unwrap().event, "heartbeat");
    }

    #[tokio::test]
    async fn attached_multiplexer_routes_bus_events() {
        let bus = EventBus::new(64);
        let mux = mux();
        mux.attach(&bus);
        let (_, mut rx) = mux.subscribe(ConversationId::from("c1"));
        rx.recv().await.unwrap();

        bus.publish(delta("c1", "via the bus"));
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(frame.data.contains("via the bus"));

        mux.close_all();
        assert_eq!(mux.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn ordered_deltas_reconstruct_message_text() {
        let mux = mux();
        let (_, mut rx) = mux.subscribe(ConversationId::from("c1"));
        rx.recv().await.unwrap();

        for part in ["Rest, ", "hydrate, ", "and monitor."] {
            mux.deliver(&delta("c1", part));
        }

        let mut text = String::new();
        for _ in 0..3 {
            let frame = rx.recv().await.unwrap();
            let data: serde_json::Value = serde_json::from_str(&frame.data).unwrap();
            text.push_str(data["delta"].as_str().unwrap());
        }
        assert_eq!(text, "Rest, hydrate, and monitor.");
    }
}
