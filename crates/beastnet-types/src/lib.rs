//! Shared types, error definitions, and constants for the Beast Mode Network.
//!
//! This crate provides the foundational types used across all beastnet
//! crates: the message envelope exchanged on the bus and persisted to
//! storage, per-agent presence records, collaboration records, and the
//! analytics/health report shapes consumed by external dashboards.
//!
//! No crate in the workspace depends on anything *except* `beastnet-types`
//! for cross-cutting type definitions. This keeps the dependency graph
//! clean and prevents circular dependencies.

mod envelope;

pub use envelope::{Envelope, EnvelopeError, BUS_CHANNEL, DEFAULT_PRIORITY};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Presence status of an agent on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Agent is reachable and active.
    Online,
    /// Agent has announced it is gone.
    Offline,
    /// Agent is reachable but occupied.
    Busy,
}

impl AgentStatus {
    /// Returns the string label stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Busy => "busy",
        }
    }

    /// Attempts to convert a stored label back to a status.
    ///
    /// Returns `None` for unknown labels.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            "busy" => Some(Self::Busy),
            _ => None,
        }
    }
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::Online
    }
}

/// Default trust score assigned to an agent on first sighting.
pub const DEFAULT_TRUST_SCORE: f64 = 0.5;

/// Per-agent aggregate state, derived from stored messages.
///
/// A presence record is created lazily on the first message from a new
/// agent and is never deleted by the core. `last_seen` only moves forward;
/// `message_count` only increments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentPresence {
    /// Agent identifier (the envelope `source`).
    pub agent_id: String,
    /// Timestamp of the most recent message from this agent.
    pub last_seen: DateTime<Utc>,
    /// Number of messages stored from this agent.
    pub message_count: i64,
    /// Capability tags announced by the agent, if any.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Trust score in `[0, 1]`. The core never mutates this; external
    /// collaborators may adjust it.
    pub trust_score: f64,
    /// Current presence status.
    pub status: AgentStatus,
}

/// A record of one help exchange between two agents.
///
/// Created by external collaborators when an exchange begins and updated
/// when it ends; the core persists and counts these for analytics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollaborationRecord {
    /// Agent that asked for help.
    pub requester_id: String,
    /// Agent that offered help.
    pub helper_id: String,
    /// Free-form label for the kind of exchange.
    pub collaboration_type: String,
    /// When the exchange started.
    pub started_at: DateTime<Utc>,
    /// When the exchange ended, if it has.
    pub completed_at: Option<DateTime<Utc>>,
    /// Whether the exchange succeeded. `None` while still in flight.
    pub success: Option<bool>,
}

/// Network-wide rollup computed on demand from the storage backend.
///
/// The serialized field names are a public contract consumed by external
/// dashboards; renaming or dropping a field is a breaking change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAnalytics {
    /// Number of distinct agents ever seen.
    pub total_agents: i64,
    /// Agents whose `last_seen` falls within the activity window.
    pub active_agents: i64,
    /// Total number of stored messages.
    pub total_messages: i64,
    /// Mean trust score across all presence records.
    pub avg_trust_score: f64,
    /// Most recent `last_seen` across all agents, if any.
    pub last_activity: Option<DateTime<Utc>>,
    /// Name of the backend that served this rollup.
    pub backend_name: String,
}

/// Window used to classify an agent as active in [`NetworkAnalytics`].
pub const ACTIVE_WINDOW_SECS: i64 = 300;

/// Health status of a storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Machine-readable health check result.
///
/// Produced by `health_check()`, which never fails: any internal error is
/// captured into [`HealthReport::error`] instead of being propagated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Overall status of the backend.
    pub status: HealthStatus,
    /// Name of the backend that was probed.
    pub backend_name: String,
    /// Description of the failure, when unhealthy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    /// A healthy report for the named backend.
    pub fn healthy(backend_name: &str) -> Self {
        Self {
            status: HealthStatus::Healthy,
            backend_name: backend_name.to_string(),
            error: None,
        }
    }

    /// An unhealthy report carrying the probe failure.
    pub fn unhealthy(backend_name: &str, error: impl std::fmt::Display) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            backend_name: backend_name.to_string(),
            error: Some(error.to_string()),
        }
    }
}
