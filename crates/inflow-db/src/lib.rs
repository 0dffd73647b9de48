//! # inflow-db
//!
//! PostgreSQL layer for the inflow connector.
//!
//! This crate provides:
//! - Connection pool management with lazy reconnects
//! - The durable work queue (`FOR UPDATE SKIP LOCKED` leasing)
//! - Per-source poll checkpoints
//! - Canonical task / email / document sinks with merge-upserts
//! - Webhook registration state
//!
//! ## Example
//!
//! ```rust,ignore
//! use inflow_db::Database;
//! use inflow_core::{EnvelopeKind, NewEnvelope, QueueRepository, Source};
//!
//! let db = Database::connect("postgres://localhost/inflow").await?;
//! db.ensure_schema().await?;
//!
//! let outcome = db
//!     .queue
//!     .enqueue(NewEnvelope::new(Source::Teamwork, EnvelopeKind::CreateOrUpdate, "42"))
//!     .await?;
//! ```

pub mod checkpoints;
pub mod docs;
pub mod emails;
pub mod pool;
pub mod queue;
pub mod registrations;
pub mod schema;
pub mod sink;
pub mod tasks;

// Always compiled so integration tests (in tests/) can share the fixtures.
pub mod test_fixtures;

// Re-export core types
pub use inflow_core::*;

pub use checkpoints::PgCheckpointRepository;
pub use docs::PgDocRepository;
pub use emails::PgEmailRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, ping, PoolConfig};
pub use queue::PgQueueRepository;
pub use registrations::PgRegistrationRepository;
pub use schema::ensure_schema;
pub use sink::PgSink;
pub use tasks::PgTaskRepository;

use std::sync::Arc;
use std::time::Duration;

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::PgPool,
    /// Durable work queue.
    pub queue: Arc<PgQueueRepository>,
    /// Per-source poll checkpoints.
    pub checkpoints: Arc<PgCheckpointRepository>,
    /// Canonical task reads.
    pub tasks: PgTaskRepository,
    /// Canonical email reads.
    pub emails: PgEmailRepository,
    /// Canonical document reads.
    pub docs: PgDocRepository,
    /// Webhook registration state.
    pub registrations: Arc<PgRegistrationRepository>,
    /// Transactional record sink.
    pub sink: Arc<PgSink>,
}

impl Database {
    /// Connect with default pool settings and queue limits.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        Ok(Self::from_pool(pool))
    }

    /// Connect and apply configured queue limits.
    pub async fn connect_with_config(database_url: &str, config: &Config) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        let mut db = Self::from_pool(pool);
        db.queue = Arc::new(
            PgQueueRepository::new(db.pool.clone()).with_limits(
                config.max_queue_attempts,
                Duration::from_secs(config.spool_retry_secs),
            ),
        );
        Ok(db)
    }

    /// Build repositories over an existing pool.
    pub fn from_pool(pool: sqlx::PgPool) -> Self {
        Self {
            queue: Arc::new(PgQueueRepository::new(pool.clone())),
            checkpoints: Arc::new(PgCheckpointRepository::new(pool.clone())),
            tasks: PgTaskRepository::new(pool.clone()),
            emails: PgEmailRepository::new(pool.clone()),
            docs: PgDocRepository::new(pool.clone()),
            registrations: Arc::new(PgRegistrationRepository::new(pool.clone())),
            sink: Arc::new(PgSink::new(pool.clone())),
            pool,
        }
    }

    /// Create all tables and indexes if missing.
    pub async fn ensure_schema(&self) -> Result<()> {
        schema::ensure_schema(&self.pool).await
    }

    /// Database reachability for health reporting.
    pub async fn is_healthy(&self) -> bool {
        ping(&self.pool).await
    }
}
