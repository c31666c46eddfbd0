//! Composition root for the Beast Mode Network.
//!
//! Wires the message bus and the storage router into one explicitly
//! constructed [`NetworkClient`], created once at process startup and
//! passed by reference to every component that needs it — there is no
//! ambient global client.
//!
//! The publish path and the store path stay independent: [`NetworkClient::send`]
//! publishes first and persists second, and a persistence failure after a
//! successful publish is reported as a partial failure
//! ([`SendError::StoreFailed`]) so the caller can retry just the store
//! step.

mod config;

pub use config::{load_config, BusConfig, Config, ConfigError, LoggingConfig, StorageConfig};

use beastnet_bus::{BusError, MessageBus, Subscription};
use beastnet_store::{StorageBackend, StorageRouter, StoreError};
use beastnet_types::{
    AgentPresence, CollaborationRecord, Envelope, HealthReport, NetworkAnalytics,
};
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Errors that can occur while building the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The storage router could not initialize any backend.
    #[error("storage initialization failed: {0}")]
    Storage(#[from] StoreError),
}

/// Errors from the publish-then-store send path.
#[derive(Debug, Error)]
pub enum SendError {
    /// The envelope was rejected before anything happened; neither
    /// delivery nor persistence took place.
    #[error("publish rejected: {0}")]
    Publish(#[from] BusError),

    /// The envelope reached live subscribers but persistence failed.
    /// Retrying the store step alone is safe; re-publishing would deliver
    /// the message twice.
    #[error("message {id} reached {delivered} subscribers but persistence failed: {source}")]
    StoreFailed {
        id: String,
        delivered: usize,
        #[source]
        source: StoreError,
    },
}

/// Outcome of a successful send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Number of live subscribers the envelope was fanned out to.
    pub delivered: usize,
}

/// Initializes the global tracing subscriber from logging configuration.
///
/// Safe to call more than once; repeat calls are no-ops.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already initialized");
    }
}

/// One handle onto the network: real-time fan-out plus durable history.
pub struct NetworkClient {
    bus: MessageBus,
    store: StorageRouter,
}

impl NetworkClient {
    /// Builds the bus and selects the storage backend.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Storage`] only if the embedded fallback
    /// itself cannot be opened; an unreachable primary degrades silently
    /// to the fallback (logged by the router).
    pub async fn connect(config: &Config) -> Result<Self, ClientError> {
        let store = StorageRouter::connect(&config.storage.to_store_config()).await?;
        Ok(Self {
            bus: MessageBus::new(config.bus.capacity),
            store,
        })
    }

    /// The underlying bus, for callers that publish raw frames or need
    /// subscriber counts.
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Name of the active storage backend.
    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    /// Whether storage degraded to the embedded fallback.
    pub fn is_fallback(&self) -> bool {
        self.store.is_fallback()
    }

    /// Publishes the envelope to live subscribers, then independently
    /// persists it.
    ///
    /// The two steps are not transactional. A crash between them can
    /// deliver a message that is never recorded (or the reverse); a store
    /// failure after a successful publish is surfaced as
    /// [`SendError::StoreFailed`] with the fan-out count preserved.
    pub async fn send(&self, envelope: &Envelope) -> Result<Delivery, SendError> {
        let delivered = self.bus.publish(envelope)?;

        if let Err(source) = self.store.store_message(envelope).await {
            tracing::error!(
                id = %envelope.id,
                delivered,
                error = %source,
                "message delivered but not persisted"
            );
            return Err(SendError::StoreFailed {
                id: envelope.id.clone(),
                delivered,
                source,
            });
        }

        Ok(Delivery { delivered })
    }

    /// Opens a subscription to the broadcast channel, optionally
    /// self-terminating after `limit`.
    pub fn subscribe(&self, limit: Option<Duration>) -> Subscription {
        self.bus.subscribe(limit)
    }

    /// Persisted history, newest first. See
    /// [`StorageBackend::fetch_recent_messages`].
    pub async fn fetch_recent_messages(
        &self,
        limit: u32,
        agent: Option<&str>,
    ) -> Result<Vec<Envelope>, StoreError> {
        self.store.fetch_recent_messages(limit, agent).await
    }

    /// Presence record for one agent, if it has ever been seen.
    pub async fn agent_presence(
        &self,
        agent_id: &str,
    ) -> Result<Option<AgentPresence>, StoreError> {
        self.store.agent_presence(agent_id).await
    }

    /// Persists a collaboration record for analytics.
    pub async fn record_collaboration(
        &self,
        record: &CollaborationRecord,
    ) -> Result<(), StoreError> {
        self.store.record_collaboration(record).await
    }

    /// Network-wide rollup, computed by the active backend at call time.
    pub async fn network_analytics(&self) -> Result<NetworkAnalytics, StoreError> {
        self.store.network_analytics().await
    }

    /// Health of the active backend. Never fails.
    pub async fn health_check(&self) -> HealthReport {
        self.store.health_check().await
    }
}
