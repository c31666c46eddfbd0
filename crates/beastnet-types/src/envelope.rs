//! The message envelope: the unit of communication and persistence.
//!
//! An envelope is built by a producer, published on the bus for live
//! listeners, and independently submitted to storage. The wire format is
//! JSON with the field names fixed below; readers tolerate unknown extra
//! fields so producers can extend the format without breaking consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// The single well-known broadcast channel. Publishers and subscribers
/// must agree on it exactly.
pub const BUS_CHANNEL: &str = "beast_mode_network";

/// Advisory delivery priority assigned when the producer does not set one.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Errors produced while building, validating, or (de)serializing envelopes.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// A required field was empty.
    #[error("envelope field '{0}' must not be empty")]
    EmptyField(&'static str),

    /// Priority outside the advisory 1 (highest) to 10 (lowest) range.
    #[error("envelope priority {0} outside valid range 1..=10")]
    PriorityOutOfRange(i32),

    /// The envelope could not be serialized to the wire format.
    #[error("envelope encode error: {0}")]
    Encode(#[source] serde_json::Error),

    /// An incoming frame could not be parsed as an envelope.
    #[error("envelope decode error: {0}")]
    Decode(#[source] serde_json::Error),
}

/// The structured message record exchanged on the bus and persisted to
/// storage.
///
/// `payload` is an arbitrary structured document specific to the message
/// `type`; the bus and the storage layer never interpret it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Globally unique identifier, assigned by the producer.
    pub id: String,

    /// Short tag classifying intent (`status_update`,
    /// `collaboration_request`, ...). Open string, not an enum, so
    /// producers can extend it.
    #[serde(rename = "type")]
    pub message_type: String,

    /// Identifier of the sending agent.
    pub source: String,

    /// Intended recipient. `None` means broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Opaque structured payload, owned by producers and consumers.
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Creation time, assigned by the producer at build time. Used for
    /// ordering in history queries.
    pub timestamp: DateTime<Utc>,

    /// Advisory priority, 1 (highest) to 10 (lowest). Not enforced by
    /// delivery order.
    #[serde(default = "default_priority")]
    pub priority: i32,

    /// Optional identifier linking related messages (a request and its
    /// replies).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

impl Envelope {
    /// Builds a new envelope with a fresh UUID, the current time, an empty
    /// payload, and the default priority.
    pub fn new(message_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type: message_type.into(),
            source: source.into(),
            target: None,
            payload: serde_json::Value::Null,
            timestamp: Utc::now(),
            priority: DEFAULT_PRIORITY,
            correlation_id: None,
        }
    }

    /// Addresses the envelope to a specific recipient.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Attaches the producer-defined payload document.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Overrides the advisory priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Links this envelope to a related message.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Checks the envelope invariants: non-empty `id` and `source`, and a
    /// priority inside the advisory range.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant as an [`EnvelopeError`].
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.id.trim().is_empty() {
            return Err(EnvelopeError::EmptyField("id"));
        }
        if self.source.trim().is_empty() {
            return Err(EnvelopeError::EmptyField("source"));
        }
        if !(1..=10).contains(&self.priority) {
            return Err(EnvelopeError::PriorityOutOfRange(self.priority));
        }
        Ok(())
    }

    /// Serializes the envelope to its JSON wire format.
    pub fn to_wire(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string(self).map_err(EnvelopeError::Encode)
    }

    /// Parses an incoming wire frame.
    ///
    /// Unknown extra fields are tolerated for forward compatibility.
    /// Decode failures are returned as an explicit error value, never a
    /// panic, so subscribers can surface corrupt frames to monitoring.
    pub fn from_wire(frame: &str) -> Result<Self, EnvelopeError> {
        serde_json::from_str(frame).map_err(EnvelopeError::Decode)
    }
}
