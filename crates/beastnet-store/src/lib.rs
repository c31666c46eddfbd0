//! Durable storage for the Beast Mode Network.
//!
//! Every message published on the network is independently persisted here,
//! along with per-agent presence records and collaboration records. Two
//! interchangeable engines implement the same [`StorageBackend`] contract:
//!
//! - [`PostgresStore`] — the networked primary, pooled via
//!   `deadpool-postgres`.
//! - [`SqliteStore`] — the embedded fallback, pooled via `r2d2` with WAL
//!   mode, used when the primary is unreachable or unconfigured.
//!
//! The [`StorageRouter`] picks exactly one backend at construction time and
//! delegates every subsequent call to it; callers stay backend-agnostic.
//!
//! # Design decisions
//!
//! - **Atomic presence upsert**: both engines update presence with a single
//!   `INSERT ... ON CONFLICT` statement so concurrent producers never lose
//!   increments.
//! - **Idempotent schema**: `CREATE TABLE IF NOT EXISTS` everywhere, safe
//!   to run on every startup.
//! - **No silent failure**: every operation returns an explicit
//!   [`StoreError`] and logs the operation name (and message id where
//!   applicable) before surfacing it.

mod config;
mod error;
mod postgres;
mod router;
mod sqlite;

pub use config::StoreConfig;
pub use error::StoreError;
pub use postgres::PostgresStore;
pub use router::StorageRouter;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use beastnet_types::{AgentPresence, CollaborationRecord, Envelope, HealthReport, NetworkAnalytics};

/// The contract implemented identically by both storage engines.
///
/// All operations may fail due to connectivity loss, malformed payloads, or
/// constraint violations; failures are reported as [`StoreError`] values and
/// never retried automatically — retries are the caller's responsibility.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Stable name of the engine (`"postgres"` or `"sqlite"`), reported in
    /// analytics and health checks.
    fn backend_name(&self) -> &'static str;

    /// Persists one envelope and atomically upserts the sender's presence
    /// record (insert with count 1 if absent, otherwise increment the count
    /// and move `last_seen` forward).
    ///
    /// Re-submitting an envelope with an already-stored `id` fails with
    /// [`StoreError::DuplicateMessage`]; it never silently overwrites.
    async fn store_message(&self, envelope: &Envelope) -> Result<(), StoreError>;

    /// Returns up to `limit` messages ordered by `timestamp` descending.
    ///
    /// If `agent` is set, only messages where that agent is the `source` or
    /// the `target` are returned.
    async fn fetch_recent_messages(
        &self,
        limit: u32,
        agent: Option<&str>,
    ) -> Result<Vec<Envelope>, StoreError>;

    /// Looks up the presence record for a single agent, if one exists.
    async fn agent_presence(&self, agent_id: &str) -> Result<Option<AgentPresence>, StoreError>;

    /// Persists one collaboration record for later analytics.
    async fn record_collaboration(&self, record: &CollaborationRecord) -> Result<(), StoreError>;

    /// Computes the network-wide rollup at call time — no caching layer;
    /// correctness over latency.
    async fn network_analytics(&self) -> Result<NetworkAnalytics, StoreError>;

    /// Issues a trivial round-trip query and reports the result.
    ///
    /// Never fails: internal errors are captured into the report's `error`
    /// field so liveness probes always get a machine-readable answer.
    async fn health_check(&self) -> HealthReport;
}
