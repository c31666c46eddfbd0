//! Real-time publish/subscribe fan-out for the Beast Mode Network.
//!
//! The bus is a pure conduit: it owns no persistent state and is fully
//! independent of the storage layer. A producer publishes an envelope for
//! live listeners and *separately* submits it to storage; there is no
//! transactional link between the two.
//!
//! Internally the bus wraps a `tokio::sync::broadcast` channel of
//! serialized wire frames for the single well-known channel name
//! ([`beastnet_types::BUS_CHANNEL`]). Every subscriber gets its own
//! receiver (fan-out, not competing consumers); delivery is at-most-once
//! and best-effort. Frames that fail to decode are surfaced to the
//! subscriber as [`BusEvent::Malformed`] rather than dropped silently, so
//! monitoring tooling can observe bus corruption.

use beastnet_types::{Envelope, EnvelopeError, BUS_CHANNEL};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Broadcast buffer size used when none is configured. Slow subscribers
/// that fall more than this many frames behind skip ahead (lossy, logged).
pub const DEFAULT_CAPACITY: usize = 256;

/// Errors that can occur on the publish path.
#[derive(Debug, Error)]
pub enum BusError {
    /// The envelope failed validation or could not be serialized; nothing
    /// was broadcast.
    #[error("publish rejected: {0}")]
    Envelope(#[from] EnvelopeError),
}

/// One item received by a subscriber.
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// A well-formed envelope.
    Message(Envelope),
    /// A frame that could not be decoded. The subscription continues; the
    /// raw frame is kept for diagnosis.
    Malformed { raw: String, error: String },
}

/// The publish/subscribe channel for the one well-known topic.
#[derive(Clone)]
pub struct MessageBus {
    tx: broadcast::Sender<String>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MessageBus {
    /// Creates a bus with the given broadcast buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// The fixed channel name publishers and subscribers agree on.
    pub fn channel(&self) -> &'static str {
        BUS_CHANNEL
    }

    /// Validates, serializes, and broadcasts an envelope to all current
    /// subscribers.
    ///
    /// Returns the number of subscribers the frame was handed to. Zero is
    /// not an error — fan-out is best-effort and a quiet network simply
    /// has no listeners.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Envelope`] if the envelope fails validation or
    /// serialization; nothing is broadcast in that case.
    pub fn publish(&self, envelope: &Envelope) -> Result<usize, BusError> {
        envelope.validate()?;
        let frame = envelope.to_wire()?;
        let delivered = self.tx.send(frame).unwrap_or(0);
        tracing::debug!(
            id = %envelope.id,
            message_type = %envelope.message_type,
            delivered,
            "published envelope"
        );
        Ok(delivered)
    }

    /// Broadcasts a raw frame without validation.
    ///
    /// Exists so monitoring and tests can exercise the malformed-frame
    /// path end to end.
    pub fn publish_raw(&self, frame: impl Into<String>) -> usize {
        self.tx.send(frame.into()).unwrap_or(0)
    }

    /// Opens a new subscription.
    ///
    /// With `limit` set, the subscription self-terminates once that
    /// wall-clock interval has elapsed; without it, it yields events until
    /// the bus is dropped. Dropping the subscription releases the channel
    /// handle either way.
    pub fn subscribe(&self, limit: Option<Duration>) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            deadline: limit.map(|d| Instant::now() + d),
        }
    }

    /// Number of currently attached subscriptions.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A live, possibly time-limited subscription to the bus.
///
/// `next()` is cancellation-safe: it can be raced inside `select!` and the
/// subscription unsubscribes on drop regardless of how the caller exits.
pub struct Subscription {
    rx: broadcast::Receiver<String>,
    deadline: Option<Instant>,
}

impl Subscription {
    /// Waits for the next event.
    ///
    /// Returns `None` once the duration limit has elapsed or the bus has
    /// been closed. Lag (the subscriber falling behind the broadcast
    /// buffer) is logged and skipped, not treated as the end of the
    /// stream.
    pub async fn next(&mut self) -> Option<BusEvent> {
        loop {
            let received = match self.deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                    Ok(received) => received,
                    Err(_elapsed) => return None,
                },
                None => self.rx.recv().await,
            };

            match received {
                Ok(frame) => {
                    return Some(match Envelope::from_wire(&frame) {
                        Ok(envelope) => BusEvent::Message(envelope),
                        Err(e) => {
                            tracing::warn!(error = %e, "received malformed bus frame");
                            BusEvent::Malformed {
                                raw: frame,
                                error: e.to_string(),
                            }
                        }
                    })
                }
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "bus subscriber lagged; missed frames were dropped");
                    continue;
                }
            }
        }
    }

    /// Time left before the subscription self-terminates, if limited.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn round_trip_delivers_field_for_field_equal_envelope() {
        let bus = MessageBus::default();
        let mut sub = bus.subscribe(None);

        let env = Envelope::new("status_update", "agent-a")
            .with_target("agent-b")
            .with_payload(json!({"message": "done"}))
            .with_priority(2)
            .with_correlation_id("corr-1");
        let delivered = bus.publish(&env).expect("publish");
        assert_eq!(delivered, 1);

        match sub.next().await {
            Some(BusEvent::Message(received)) => assert_eq!(received, env),
            other => panic!("expected Message event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fan_out_reaches_every_subscriber() {
        let bus = MessageBus::default();
        let mut first = bus.subscribe(None);
        let mut second = bus.subscribe(None);

        let env = Envelope::new("status_update", "agent-a");
        let delivered = bus.publish(&env).expect("publish");
        assert_eq!(delivered, 2);

        for sub in [&mut first, &mut second] {
            match sub.next().await {
                Some(BusEvent::Message(received)) => assert_eq!(received.id, env.id),
                other => panic!("expected Message event, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_not_an_error() {
        let bus = MessageBus::default();
        let delivered = bus
            .publish(&Envelope::new("status_update", "agent-a"))
            .expect("publish");
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn invalid_envelope_is_rejected_before_broadcast() {
        let bus = MessageBus::default();
        let mut sub = bus.subscribe(Some(Duration::from_millis(10)));

        let mut env = Envelope::new("status_update", "agent-a");
        env.source = String::new();
        assert!(matches!(bus.publish(&env), Err(BusError::Envelope(_))));

        // Nothing reached the subscriber; the window elapses empty.
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn malformed_frame_is_surfaced_and_subscription_continues() {
        let bus = MessageBus::default();
        let mut sub = bus.subscribe(None);

        bus.publish_raw("{corrupt frame");
        let env = Envelope::new("status_update", "agent-a");
        bus.publish(&env).expect("publish");

        match sub.next().await {
            Some(BusEvent::Malformed { raw, error }) => {
                assert_eq!(raw, "{corrupt frame");
                assert!(!error.is_empty());
            }
            other => panic!("expected Malformed event, got {other:?}"),
        }
        // The stream did not terminate on the bad frame.
        match sub.next().await {
            Some(BusEvent::Message(received)) => assert_eq!(received.id, env.id),
            other => panic!("expected Message event, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn duration_limited_subscription_self_terminates() {
        let bus = MessageBus::default();
        let mut sub = bus.subscribe(Some(Duration::from_secs(2)));
        assert_eq!(bus.receiver_count(), 1);

        let started = Instant::now();
        assert!(sub.next().await.is_none());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2), "returned early: {elapsed:?}");

        drop(sub);
        assert_eq!(bus.receiver_count(), 0, "handle still registered after drop");
    }

    #[tokio::test(start_paused = true)]
    async fn events_before_the_deadline_are_still_delivered() {
        let bus = MessageBus::default();
        let mut sub = bus.subscribe(Some(Duration::from_secs(5)));

        let env = Envelope::new("status_update", "agent-a");
        bus.publish(&env).expect("publish");

        match sub.next().await {
            Some(BusEvent::Message(received)) => assert_eq!(received.id, env.id),
            other => panic!("expected Message event, got {other:?}"),
        }
        // After the buffered frame, the limit still applies.
        assert!(sub.next().await.is_none());
    }

    #[test]
    fn channel_name_is_the_shared_network_contract() {
        // Publishers and subscribers in other processes key on this exact
        // string; changing it partitions the network.
        assert_eq!(MessageBus::default().channel(), "beast_mode_network");
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_tracks_the_deadline() {
        let bus = MessageBus::default();
        let sub = bus.subscribe(Some(Duration::from_secs(10)));
        assert!(sub.remaining().expect("limited subscription") <= Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(4)).await;
        let left = sub.remaining().expect("limited subscription");
        assert!(left <= Duration::from_secs(6));
        assert!(left >= Duration::from_secs(5));

        assert!(bus.subscribe(None).remaining().is_none());
    }

    #[tokio::test]
    async fn dropping_subscription_releases_the_handle() {
        let bus = MessageBus::default();
        let sub = bus.subscribe(None);
        let other = bus.subscribe(None);
        assert_eq!(bus.receiver_count(), 2);
        drop(sub);
        assert_eq!(bus.receiver_count(), 1);
        drop(other);
        assert_eq!(bus.receiver_count(), 0);
    }
}
