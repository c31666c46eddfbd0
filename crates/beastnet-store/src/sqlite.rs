//! Embedded SQLite fallback backend.
//!
//! Mirrors the primary schema exactly (minus network-only tuning) so that
//! history and analytics queries return structurally identical results
//! regardless of which backend is active. Connections come from an `r2d2`
//! pool opened with WAL mode, a busy timeout, and the full mutex so the
//! engine serializes concurrent writers within the process.
//!
//! rusqlite is synchronous, and a contended write can sit in the busy
//! timeout for seconds, so every operation runs its connection work on the
//! blocking thread pool via `spawn_blocking` rather than on an async
//! worker.
//!
//! Presence updates use SQLite's native `ON CONFLICT ... DO UPDATE` upsert:
//! a single atomic statement rather than select-then-write, so concurrent
//! `store_message` calls never lose increments.

use async_trait::async_trait;
use beastnet_types::{
    AgentPresence, AgentStatus, CollaborationRecord, Envelope, HealthReport, NetworkAnalytics,
    ACTIVE_WINDOW_SECS,
};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OpenFlags, Row};

use crate::{StorageBackend, StoreConfig, StoreError};

/// Name reported by this backend in analytics and health checks.
pub const BACKEND_NAME: &str = "sqlite";

type DbPool = r2d2::Pool<SqliteConnectionManager>;

/// Idempotent schema, executed on every startup.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    type TEXT NOT NULL,
    source TEXT NOT NULL,
    target TEXT,
    payload TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 5,
    correlation_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages (timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_messages_source_type ON messages (source, type);
CREATE INDEX IF NOT EXISTS idx_messages_target ON messages (target);
CREATE INDEX IF NOT EXISTS idx_messages_correlation ON messages (correlation_id);

CREATE TABLE IF NOT EXISTS agent_activity (
    agent_id TEXT PRIMARY KEY,
    last_seen TEXT NOT NULL,
    message_count INTEGER NOT NULL DEFAULT 0,
    capabilities TEXT,
    trust_score REAL NOT NULL DEFAULT 0.5,
    status TEXT NOT NULL DEFAULT 'online'
);
CREATE INDEX IF NOT EXISTS idx_agent_activity_last_seen ON agent_activity (last_seen);
CREATE INDEX IF NOT EXISTS idx_agent_activity_status ON agent_activity (status);

CREATE TABLE IF NOT EXISTS agent_collaborations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    requester_id TEXT NOT NULL,
    helper_id TEXT NOT NULL,
    collaboration_type TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    success INTEGER
);
CREATE INDEX IF NOT EXISTS idx_collab_requester ON agent_collaborations (requester_id);
CREATE INDEX IF NOT EXISTS idx_collab_helper ON agent_collaborations (helper_id);
CREATE INDEX IF NOT EXISTS idx_collab_type_started
    ON agent_collaborations (collaboration_type, started_at);
";

/// Encodes a timestamp as fixed-width RFC 3339 with microsecond precision.
///
/// Fixed width keeps lexicographic TEXT ordering identical to chronological
/// ordering, which the timestamp indexes rely on.
fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(column: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn sqlite_err(operation: &'static str) -> impl Fn(rusqlite::Error) -> StoreError {
    move |source| StoreError::Sqlite { operation, source }
}

/// A primary-key conflict on the messages insert, and only that. Other
/// constraint failures (NOT NULL, CHECK) keep their own error.
fn is_duplicate_id(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

/// The embedded fallback backend.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and runs the idempotent
    /// schema setup.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the pool cannot be built or the schema
    /// cannot be applied.
    pub fn open(path: &str, config: &StoreConfig) -> Result<Self, StoreError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let busy_timeout_ms = config.busy_timeout_ms;
        let manager = SqliteConnectionManager::file(path)
            .with_flags(flags)
            .with_init(move |conn| {
                // WAL allows concurrent readers alongside the single writer.
                // In-memory databases report "memory", which is acceptable.
                let journal_mode: String =
                    conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
                if journal_mode != "wal" && journal_mode != "memory" {
                    return Err(rusqlite::Error::SqliteFailure(
                        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                        Some(format!(
                            "failed to set WAL journal mode, got: {journal_mode}"
                        )),
                    ));
                }
                conn.execute_batch(&format!("PRAGMA busy_timeout = {busy_timeout_ms};"))
            });

        let pool = r2d2::Pool::builder()
            .max_size(config.pool_max_size)
            .build(manager)
            .map_err(|source| StoreError::SqlitePool {
                operation: "open",
                source,
            })?;

        let conn = pool.get().map_err(|source| StoreError::SqlitePool {
            operation: "open",
            source,
        })?;
        conn.execute_batch(SCHEMA).map_err(sqlite_err("schema"))?;

        tracing::info!(path, "embedded sqlite store ready");
        Ok(Self { pool })
    }

    /// Checks out a connection and runs `f` on the blocking thread pool,
    /// keeping busy-timeout waits off the async workers.
    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|source| StoreError::SqlitePool { operation, source })?;
            f(&conn)
        })
        .await
        .map_err(|source| StoreError::SqliteWorker { operation, source })?
    }
}

fn map_row_to_envelope(row: &Row) -> rusqlite::Result<Envelope> {
    let payload_text: String = row.get(4)?;
    let payload = serde_json::from_str(&payload_text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let ts_text: String = row.get(5)?;

    Ok(Envelope {
        id: row.get(0)?,
        message_type: row.get(1)?,
        source: row.get(2)?,
        target: row.get(3)?,
        payload,
        timestamp: decode_ts(5, &ts_text)?,
        priority: row.get(6)?,
        correlation_id: row.get(7)?,
    })
}

fn map_row_to_presence(row: &Row) -> rusqlite::Result<AgentPresence> {
    let ts_text: String = row.get(1)?;
    let capabilities_text: Option<String> = row.get(3)?;
    let capabilities = match capabilities_text {
        Some(text) => serde_json::from_str(&text).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?,
        None => Vec::new(),
    };
    let status_text: String = row.get(5)?;

    Ok(AgentPresence {
        agent_id: row.get(0)?,
        last_seen: decode_ts(1, &ts_text)?,
        message_count: row.get(2)?,
        capabilities,
        trust_score: row.get(4)?,
        status: AgentStatus::from_str_opt(&status_text).unwrap_or_default(),
    })
}

#[async_trait]
impl StorageBackend for SqliteStore {
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

        let envelope = envelope.clone();
        self.with_conn("store_message", move |conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(sqlite_err("store_message"))?;

            let inserted = tx.execute(
                "INSERT INTO messages
                    (id, type, source, target, payload, timestamp, priority, correlation_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    envelope.id,
                    envelope.message_type,
                    envelope.source,
                    envelope.target,
                    payload_text,
                    encode_ts(&envelope.timestamp),
                    envelope.priority,
                    envelope.correlation_id,
                ],
            );
            if let Err(e) = inserted {
                if is_duplicate_id(&e) {
                    tracing::warn!(id = %envelope.id, "rejected duplicate message id");
                    return Err(StoreError::DuplicateMessage(envelope.id.clone()));
                }
                tracing::error!(id = %envelope.id, error = %e, "store_message insert failed");
                return Err(StoreError::Sqlite {
                    operation: "store_message",
                    source: e,
                });
            }

            // Single atomic upsert; MAX keeps last_seen monotonic when
            // messages arrive out of timestamp order.
            tx.execute(
                "INSERT INTO agent_activity (agent_id, last_seen, message_count)
                 VALUES (?1, ?2, 1)
                 ON CONFLICT(agent_id) DO UPDATE SET
                     message_count = message_count + 1,
                     last_seen = MAX(last_seen, excluded.last_seen)",
                params![envelope.source, encode_ts(&envelope.timestamp)],
            )
            .map_err(sqlite_err("store_message"))?;

            tx.commit().map_err(sqlite_err("store_message"))?;
            tracing::debug!(id = %envelope.id, source = %envelope.source, "message stored");
            Ok(())
        })
        .await
    }

    async fn fetch_recent_messages(
        &self,
        limit: u32,
        agent: Option<&str>,
    ) -> Result<Vec<Envelope>, StoreError> {
        let agent = agent.map(str::to_string);
        self.with_conn("fetch_recent_messages", move |conn| {
            let mut messages = Vec::new();
            if let Some(agent) = agent {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, type, source, target, payload, timestamp, priority, correlation_id
                         FROM messages
                         WHERE source = ?1 OR target = ?1
                         ORDER BY timestamp DESC
                         LIMIT ?2",
                    )
                    .map_err(sqlite_err("fetch_recent_messages"))?;
                let rows = stmt
                    .query_map(params![agent, limit as i64], map_row_to_envelope)
                    .map_err(sqlite_err("fetch_recent_messages"))?;
                for row in rows {
                    messages.push(row.map_err(sqlite_err("fetch_recent_messages"))?);
                }
            } else {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, type, source, target, payload, timestamp, priority, correlation_id
                         FROM messages
                         ORDER BY timestamp DESC
                         LIMIT ?1",
                    )
                    .map_err(sqlite_err("fetch_recent_messages"))?;
                let rows = stmt
                    .query_map(params![limit as i64], map_row_to_envelope)
                    .map_err(sqlite_err("fetch_recent_messages"))?;
                for row in rows {
                    messages.push(row.map_err(sqlite_err("fetch_recent_messages"))?);
                }
            }
            Ok(messages)
        })
        .await
    }

    async fn agent_presence(&self, agent_id: &str) -> Result<Option<AgentPresence>, StoreError> {
        use rusqlite::OptionalExtension;

        let agent_id = agent_id.to_string();
        self.with_conn("agent_presence", move |conn| {
            conn.query_row(
                "SELECT agent_id, last_seen, message_count, capabilities, trust_score, status
                 FROM agent_activity WHERE agent_id = ?1",
                [agent_id],
                map_row_to_presence,
            )
            .optional()
            .map_err(sqlite_err("agent_presence"))
        })
        .await
    }

    async fn record_collaboration(&self, record: &CollaborationRecord) -> Result<(), StoreError> {
        let record = record.clone();
        self.with_conn("record_collaboration", move |conn| {
            conn.execute(
                "INSERT INTO agent_collaborations
                    (requester_id, helper_id, collaboration_type, started_at, completed_at, success)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.requester_id,
                    record.helper_id,
                    record.collaboration_type,
                    encode_ts(&record.started_at),
                    record.completed_at.as_ref().map(encode_ts),
                    record.success,
                ],
            )
            .map_err(sqlite_err("record_collaboration"))?;
            Ok(())
        })
        .await
    }

    async fn network_analytics(&self) -> Result<NetworkAnalytics, StoreError> {
        self.with_conn("network_analytics", |conn| {
            let err = sqlite_err("network_analytics");

            let (total_agents, avg_trust_score, last_activity): (i64, f64, Option<String>) = conn
                .query_row(
                    "SELECT COUNT(*), COALESCE(AVG(trust_score), 0.0), MAX(last_seen)
                     FROM agent_activity",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .map_err(&err)?;

            let cutoff = encode_ts(&(Utc::now() - chrono::Duration::seconds(ACTIVE_WINDOW_SECS)));
            let active_agents: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM agent_activity WHERE last_seen >= ?1",
                    [cutoff],
                    |row| row.get(0),
                )
                .map_err(&err)?;

            let total_messages: i64 = conn
                .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
                .map_err(&err)?;

            let last_activity = match last_activity {
                Some(text) => Some(decode_ts(0, &text).map_err(&err)?),
                None => None,
            };

            Ok(NetworkAnalytics {
                total_agents,
                active_agents,
                total_messages,
                avg_trust_score,
                last_activity,
                backend_name: BACKEND_NAME.to_string(),
            })
        })
        .await
    }

    async fn health_check(&self) -> HealthReport {
        let probe = self
            .with_conn("health_check", |conn| {
                conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                    .map_err(sqlite_err("health_check"))
            })
            .await;
        match probe {
            Ok(_) => HealthReport::healthy(BACKEND_NAME),
            Err(e) => HealthReport::unhealthy(BACKEND_NAME, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beastnet_types::HealthStatus;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn open_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("net.db");
        let store = SqliteStore::open(path.to_str().expect("utf-8 path"), &StoreConfig::default())
            .expect("open store");
        (dir, store)
    }

    fn envelope_at(id: &str, source: &str, secs: u32) -> Envelope {
        let mut env = Envelope::new("status_update", source).with_payload(json!({"n": secs}));
        env.id = id.to_string();
        env.timestamp = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, secs).unwrap();
        env
    }

    #[tokio::test]
    async fn schema_setup_is_idempotent() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("net.db");
        let path = path.to_str().expect("utf-8 path");

        let first = SqliteStore::open(path, &StoreConfig::default()).expect("first open");
        first
            .store_message(&envelope_at("m1", "agent-a", 1))
            .await
            .expect("store");
        drop(first);

        // Reopening against the same file must not fail or lose data.
        let second = SqliteStore::open(path, &StoreConfig::default()).expect("second open");
        let messages = second
            .fetch_recent_messages(10, None)
            .await
            .expect("fetch");
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn store_and_fetch_round_trip() {
        let (_dir, store) = open_store();

        let env = envelope_at("m1", "agent-a", 1)
            .with_target("agent-b")
            .with_correlation_id("corr-1");
        store.store_message(&env).await.expect("store");

        let messages = store.fetch_recent_messages(10, None).await.expect("fetch");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], env);
    }

    #[tokio::test]
    async fn fetch_orders_newest_first_and_honors_limit() {
        let (_dir, store) = open_store();

        for i in 0..5 {
            store
                .store_message(&envelope_at(&format!("m{i}"), "agent-a", i))
                .await
                .expect("store");
        }

        let messages = store.fetch_recent_messages(3, None).await.expect("fetch");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].id, "m4");
        assert_eq!(messages[1].id, "m3");
        assert_eq!(messages[2].id, "m2");
    }

    #[tokio::test]
    async fn agent_filter_matches_source_or_target() {
        let (_dir, store) = open_store();

        store
            .store_message(&envelope_at("m1", "agent-a", 1))
            .await
            .expect("store");
        store
            .store_message(&envelope_at("m2", "agent-b", 2).with_target("agent-a"))
            .await
            .expect("store");
        store
            .store_message(&envelope_at("m3", "agent-b", 3).with_target("agent-c"))
            .await
            .expect("store");

        let messages = store
            .fetch_recent_messages(10, Some("agent-a"))
            .await
            .expect("fetch");
        let ids: Vec<_> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m1"]);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected_not_overwritten() {
        let (_dir, store) = open_store();

        let original = envelope_at("m1", "agent-a", 1);
        store.store_message(&original).await.expect("store");

        let mut imposter = envelope_at("m1", "agent-z", 2);
        imposter.payload = json!({"overwrite": true});
        match store.store_message(&imposter).await {
            Err(StoreError::DuplicateMessage(id)) => assert_eq!(id, "m1"),
            other => panic!("expected DuplicateMessage, got {other:?}"),
        }

        // Stored row is untouched and no phantom presence was created.
        let messages = store.fetch_recent_messages(10, None).await.expect("fetch");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].source, "agent-a");
        assert!(store
            .agent_presence("agent-z")
            .await
            .expect("presence lookup")
            .is_none());
    }

    #[test]
    fn duplicate_detection_matches_only_primary_key_conflicts() {
        let conn = rusqlite::Connection::open_in_memory().expect("open");
        conn.execute_batch("CREATE TABLE t (id TEXT PRIMARY KEY, v TEXT NOT NULL);")
            .expect("schema");
        conn.execute("INSERT INTO t VALUES ('a', 'x')", [])
            .expect("insert");

        let pk_conflict = conn
            .execute("INSERT INTO t VALUES ('a', 'y')", [])
            .expect_err("pk conflict");
        assert!(is_duplicate_id(&pk_conflict));

        let not_null = conn
            .execute("INSERT INTO t (id) VALUES ('b')", [])
            .expect_err("not null violation");
        assert!(!is_duplicate_id(&not_null));
    }

    #[tokio::test]
    async fn presence_upsert_increments_and_moves_last_seen_forward() {
        let (_dir, store) = open_store();

        store
            .store_message(&envelope_at("m1", "agent-a", 5))
            .await
            .expect("store");
        let presence = store
            .agent_presence("agent-a")
            .await
            .expect("lookup")
            .expect("presence exists");
        assert_eq!(presence.message_count, 1);
        assert_eq!(presence.status, AgentStatus::Online);
        assert_eq!(presence.trust_score, 0.5);
        assert!(presence.capabilities.is_empty());

        // An older message still increments the counter but must not move
        // last_seen backwards.
        store
            .store_message(&envelope_at("m2", "agent-a", 2))
            .await
            .expect("store");
        let presence = store
            .agent_presence("agent-a")
            .await
            .expect("lookup")
            .expect("presence exists");
        assert_eq!(presence.message_count, 2);
        assert_eq!(
            presence.last_seen,
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 5).unwrap()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_stores_never_lose_increments() {
        let (_dir, store) = open_store();
        let store = Arc::new(store);

        const N: u32 = 24;
        let mut handles = Vec::new();
        for i in 0..N {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .store_message(&envelope_at(&format!("m{i}"), "agent-a", i))
                    .await
            }));
        }
        for handle in handles {
            handle.await.expect("task").expect("store");
        }

        let presence = store
            .agent_presence("agent-a")
            .await
            .expect("lookup")
            .expect("presence exists");
        assert_eq!(presence.message_count, i64::from(N));
        assert_eq!(
            presence.last_seen,
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, N - 1).unwrap()
        );
    }

    #[tokio::test]
    async fn busy_waits_do_not_stall_the_runtime() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("net.db");
        let path = path.to_str().expect("utf-8 path");
        let config = StoreConfig {
            busy_timeout_ms: 10_000,
            ..StoreConfig::default()
        };
        let store = SqliteStore::open(path, &config).expect("open store");

        // Hold the write lock from a separate plain connection.
        let blocker = rusqlite::Connection::open(path).expect("open blocker");
        blocker.execute_batch("BEGIN IMMEDIATE;").expect("lock");

        let writer = store.clone();
        let pending =
            tokio::spawn(async move { writer.store_message(&envelope_at("m1", "agent-a", 1)).await });

        // This test runs on a current-thread runtime: the timer below can
        // only fire while the write is parked off the async thread.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!pending.is_finished(), "write finished despite held lock");

        blocker.execute_batch("COMMIT;").expect("unlock");
        pending.await.expect("task").expect("store");
    }

    #[tokio::test]
    async fn analytics_after_two_agents() {
        let (_dir, store) = open_store();

        let mut env_a = Envelope::new("status_update", "agent-a");
        env_a.id = "m1".to_string();
        let mut env_b = Envelope::new("status_update", "agent-b");
        env_b.id = "m2".to_string();
        store.store_message(&env_a).await.expect("store");
        store.store_message(&env_b).await.expect("store");

        let analytics = store.network_analytics().await.expect("analytics");
        assert_eq!(analytics.total_agents, 2);
        assert_eq!(analytics.total_messages, 2);
        // Both messages were just stored, so both agents are active.
        assert_eq!(analytics.active_agents, 2);
        assert!((analytics.avg_trust_score - 0.5).abs() < f64::EPSILON);
        assert!(analytics.last_activity.is_some());
        assert_eq!(analytics.backend_name, "sqlite");
    }

    #[tokio::test]
    async fn analytics_on_empty_store() {
        let (_dir, store) = open_store();

        let analytics = store.network_analytics().await.expect("analytics");
        assert_eq!(analytics.total_agents, 0);
        assert_eq!(analytics.active_agents, 0);
        assert_eq!(analytics.total_messages, 0);
        assert_eq!(analytics.avg_trust_score, 0.0);
        assert_eq!(analytics.last_activity, None);
    }

    #[tokio::test]
    async fn stale_agents_are_not_active() {
        let (_dir, store) = open_store();

        // agent-a last seen far in the past, agent-b just now.
        store
            .store_message(&envelope_at("m1", "agent-a", 1))
            .await
            .expect("store");
        let mut fresh = Envelope::new("status_update", "agent-b");
        fresh.id = "m2".to_string();
        store.store_message(&fresh).await.expect("store");

        let analytics = store.network_analytics().await.expect("analytics");
        assert_eq!(analytics.total_agents, 2);
        assert_eq!(analytics.active_agents, 1);
    }

    #[tokio::test]
    async fn collaboration_records_persist() {
        let (_dir, store) = open_store();

        let record = CollaborationRecord {
            requester_id: "agent-a".to_string(),
            helper_id: "agent-b".to_string(),
            collaboration_type: "code_review".to_string(),
            started_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            completed_at: None,
            success: None,
        };
        store
            .record_collaboration(&record)
            .await
            .expect("record open collaboration");

        let completed = CollaborationRecord {
            completed_at: Some(Utc.with_ymd_and_hms(2026, 3, 1, 12, 5, 0).unwrap()),
            success: Some(true),
            ..record
        };
        store
            .record_collaboration(&completed)
            .await
            .expect("record completed collaboration");
    }

    #[tokio::test]
    async fn invalid_envelope_is_rejected_before_storage() {
        let (_dir, store) = open_store();

        let mut env = Envelope::new("status_update", "agent-a");
        env.source = String::new();
        match store.store_message(&env).await {
            Err(StoreError::Envelope(_)) => {}
            other => panic!("expected Envelope error, got {other:?}"),
        }
        assert!(store
            .fetch_recent_messages(10, None)
            .await
            .expect("fetch")
            .is_empty());
    }

    #[tokio::test]
    async fn health_check_reports_healthy() {
        let (_dir, store) = open_store();
        let report = store.health_check().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.backend_name, "sqlite");
        assert_eq!(report.error, None);
    }
}
