//! Networked Postgres primary backend.
//!
//! Connections come from a `deadpool-postgres` pool built from a single
//! connection string. The pool is created once at router construction and
//! reused for the process lifetime — no per-call connection churn. A probe
//! query bounded by the configured connect timeout decides at startup
//! whether this backend is usable at all; after that, errors are surfaced
//! to callers rather than triggering a fallback.
//!
//! The presence upsert is a single `INSERT ... ON CONFLICT DO UPDATE`
//! statement so concurrent producers on different connections never lose
//! increments.

use async_trait::async_trait;
use beastnet_types::{
    AgentPresence, AgentStatus, CollaborationRecord, Envelope, HealthReport, NetworkAnalytics,
    ACTIVE_WINDOW_SECS,
};
use chrono::{DateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};

use crate::{StorageBackend, StoreError};

/// Name reported by this backend in analytics and health checks.
pub const BACKEND_NAME: &str = "postgres";

/// Idempotent schema statements, executed on every startup.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        \"type\" TEXT NOT NULL,
        source TEXT NOT NULL,
        target TEXT,
        payload TEXT NOT NULL,
        \"timestamp\" TIMESTAMPTZ NOT NULL,
        priority INTEGER NOT NULL DEFAULT 5,
        correlation_id TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages (\"timestamp\" DESC)",
    "CREATE INDEX IF NOT EXISTS idx_messages_source_type ON messages (source, \"type\")",
    "CREATE INDEX IF NOT EXISTS idx_messages_target ON messages (target)",
    "CREATE INDEX IF NOT EXISTS idx_messages_correlation ON messages (correlation_id)",
    "CREATE TABLE IF NOT EXISTS agent_activity (
        agent_id TEXT PRIMARY KEY,
        last_seen TIMESTAMPTZ NOT NULL,
        message_count BIGINT NOT NULL DEFAULT 0,
        capabilities TEXT,
        trust_score DOUBLE PRECISION NOT NULL DEFAULT 0.5,
        status TEXT NOT NULL DEFAULT 'online'
    )",
    "CREATE INDEX IF NOT EXISTS idx_agent_activity_last_seen ON agent_activity (last_seen)",
    "CREATE INDEX IF NOT EXISTS idx_agent_activity_status ON agent_activity (status)",
    "CREATE TABLE IF NOT EXISTS agent_collaborations (
        id BIGSERIAL PRIMARY KEY,
        requester_id TEXT NOT NULL,
        helper_id TEXT NOT NULL,
        collaboration_type TEXT NOT NULL,
        started_at TIMESTAMPTZ NOT NULL,
        completed_at TIMESTAMPTZ,
        success BOOLEAN
    )",
    "CREATE INDEX IF NOT EXISTS idx_collab_requester ON agent_collaborations (requester_id)",
    "CREATE INDEX IF NOT EXISTS idx_collab_helper ON agent_collaborations (helper_id)",
    "CREATE INDEX IF NOT EXISTS idx_collab_type_started
        ON agent_collaborations (collaboration_type, started_at)",
];

fn pg_err(operation: &'static str) -> impl Fn(tokio_postgres::Error) -> StoreError {
    move |source| StoreError::Postgres { operation, source }
}

/// The networked primary backend.
#[derive(Clone)]
pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    /// Builds the pool from `url`, verifies connectivity with a probe query
    /// bounded by `connect_timeout`, and runs the idempotent schema setup.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] for an unparseable connection string, a
    /// failed or timed-out probe, or a schema failure. The router treats
    /// any of these as the signal to fall back to the embedded engine.
    pub async fn connect(
        url: &str,
        connect_timeout: std::time::Duration,
        pool_max_size: u32,
    ) -> Result<Self, StoreError> {
        let pg_config: tokio_postgres::Config =
            url.parse().map_err(StoreError::InvalidConnectionString)?;

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(pool_max_size as usize)
            .build()
            .map_err(StoreError::PoolBuild)?;

        let store = Self { pool };
        tokio::time::timeout(connect_timeout, store.probe())
            .await
            .map_err(|_| StoreError::ProbeTimeout(connect_timeout))??;
        store.ensure_schema().await?;

        tracing::info!("primary postgres store ready");
        Ok(store)
    }

    async fn conn(
        &self,
        operation: &'static str,
    ) -> Result<deadpool_postgres::Object, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|source| StoreError::PostgresPool { operation, source })
    }

    /// Trivial round-trip query used as the startup connectivity probe.
    async fn probe(&self) -> Result<(), StoreError> {
        let conn = self.conn("probe").await?;
        conn.query_one("SELECT 1", &[])
            .await
            .map_err(pg_err("probe"))?;
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn("schema").await?;
        for statement in SCHEMA {
            conn.execute(*statement, &[])
                .await
                .map_err(pg_err("schema"))?;
        }
        Ok(())
    }
}

fn row_to_envelope(row: &Row) -> Result<Envelope, StoreError> {
    let payload_text: String = row.get(4);
    let payload = serde_json::from_str(&payload_text).map_err(|source| StoreError::Payload {
        id: row.get(0),
        source,
    })?;

    Ok(Envelope {
        id: row.get(0),
        message_type: row.get(1),
        source: row.get(2),
        target: row.get(3),
        payload,
        timestamp: row.get(5),
        priority: row.get(6),
        correlation_id: row.get(7),
    })
}

fn row_to_presence(row: &Row) -> Result<AgentPresence, StoreError> {
    let capabilities_text: Option<String> = row.get(3);
    let capabilities = match capabilities_text {
        Some(text) => serde_json::from_str(&text).map_err(|source| StoreError::Payload {
            id: row.get(0),
            source,
        })?,
        None => Vec::new(),
    };
    let status_text: String = row.get(5);

    Ok(AgentPresence {
        agent_id: row.get(0),
        last_seen: row.get(1),
        message_count: row.get(2),
        capabilities,
        trust_score: row.get(4),
        status: AgentStatus::from_str_opt(&status_text).unwrap_or_default(),
    })
}

#[async_trait]
impl StorageBackend for PostgresStore {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn store_message(&self, envelope: &Envelope) -> Result<(), StoreError> {
        envelope.validate()?;
        let payload_text =
            serde_json::to_string(&envelope.payload).map_err(|source| StoreError::Payload {
                id: envelope.id.clone(),
                source,
            })?;

        let mut conn = self.conn("store_message").await?;
        let tx = conn
            .transaction()
            .await
            .map_err(pg_err("store_message"))?;

        let inserted = tx
            .execute(
                "INSERT INTO messages
                    (id, \"type\", source, target, payload, \"timestamp\", priority, correlation_id)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &envelope.id,
                    &envelope.message_type,
                    &envelope.source,
                    &envelope.target,
                    &payload_text,
                    &envelope.timestamp,
                    &envelope.priority,
                    &envelope.correlation_id,
                ],
            )
            .await;
        if let Err(e) = inserted {
            if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                tracing::warn!(id = %envelope.id, "rejected duplicate message id");
                return Err(StoreError::DuplicateMessage(envelope.id.clone()));
            }
            tracing::error!(id = %envelope.id, error = %e, "store_message insert failed");
            return Err(StoreError::Postgres {
                operation: "store_message",
                source: e,
            });
        }

        tx.execute(
            "INSERT INTO agent_activity (agent_id, last_seen, message_count)
             VALUES ($1, $2, 1)
             ON CONFLICT (agent_id) DO UPDATE SET
                 message_count = agent_activity.message_count + 1,
                 last_seen = GREATEST(agent_activity.last_seen, EXCLUDED.last_seen)",
            &[&envelope.source, &envelope.timestamp],
        )
        .await
        .map_err(pg_err("store_message"))?;

        tx.commit().await.map_err(pg_err("store_message"))?;
        tracing::debug!(id = %envelope.id, source = %envelope.source, "message stored");
        Ok(())
    }

    async fn fetch_recent_messages(
        &self,
        limit: u32,
        agent: Option<&str>,
    ) -> Result<Vec<Envelope>, StoreError> {
        let conn = self.conn("fetch_recent_messages").await?;
        let limit = i64::from(limit);

        let rows = if let Some(agent) = agent {
            conn.query(
                "SELECT id, \"type\", source, target, payload, \"timestamp\", priority, correlation_id
                 FROM messages
                 WHERE source = $1 OR target = $1
                 ORDER BY \"timestamp\" DESC
                 LIMIT $2",
                &[&agent, &limit],
            )
            .await
        } else {
            conn.query(
                "SELECT id, \"type\", source, target, payload, \"timestamp\", priority, correlation_id
                 FROM messages
                 ORDER BY \"timestamp\" DESC
                 LIMIT $1",
                &[&limit],
            )
            .await
        }
        .map_err(pg_err("fetch_recent_messages"))?;

        rows.iter().map(row_to_envelope).collect()
    }

    async fn agent_presence(&self, agent_id: &str) -> Result<Option<AgentPresence>, StoreError> {
        let conn = self.conn("agent_presence").await?;
        let row = conn
            .query_opt(
                "SELECT agent_id, last_seen, message_count, capabilities, trust_score, status
                 FROM agent_activity WHERE agent_id = $1",
                &[&agent_id],
            )
            .await
            .map_err(pg_err("agent_presence"))?;

        row.as_ref().map(row_to_presence).transpose()
    }

    async fn record_collaboration(&self, record: &CollaborationRecord) -> Result<(), StoreError> {
        let conn = self.conn("record_collaboration").await?;
        conn.execute(
            "INSERT INTO agent_collaborations
                (requester_id, helper_id, collaboration_type, started_at, completed_at, success)
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                &record.requester_id,
                &record.helper_id,
                &record.collaboration_type,
                &record.started_at,
                &record.completed_at,
                &record.success,
            ],
        )
        .await
        .map_err(pg_err("record_collaboration"))?;
        Ok(())
    }

    async fn network_analytics(&self) -> Result<NetworkAnalytics, StoreError> {
        let conn = self.conn("network_analytics").await?;

        let row = conn
            .query_one(
                "SELECT COUNT(*), COALESCE(AVG(trust_score), 0.0), MAX(last_seen)
                 FROM agent_activity",
                &[],
            )
            .await
            .map_err(pg_err("network_analytics"))?;
        let total_agents: i64 = row.get(0);
        let avg_trust_score: f64 = row.get(1);
        let last_activity: Option<DateTime<Utc>> = row.get(2);

        let cutoff = Utc::now() - chrono::Duration::seconds(ACTIVE_WINDOW_SECS);
        let active_agents: i64 = conn
            .query_one(
                "SELECT COUNT(*) FROM agent_activity WHERE last_seen >= $1",
                &[&cutoff],
            )
            .await
            .map_err(pg_err("network_analytics"))?
            .get(0);

        let total_messages: i64 = conn
            .query_one("SELECT COUNT(*) FROM messages", &[])
            .await
            .map_err(pg_err("network_analytics"))?
            .get(0);

        Ok(NetworkAnalytics {
            total_agents,
            active_agents,
            total_messages,
            avg_trust_score,
            last_activity,
            backend_name: BACKEND_NAME.to_string(),
        })
    }

    async fn health_check(&self) -> HealthReport {
        match self.probe().await {
            Ok(()) => HealthReport::healthy(BACKEND_NAME),
            Err(e) => HealthReport::unhealthy(BACKEND_NAME, e),
        }
    }
}
