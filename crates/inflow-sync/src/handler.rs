//! Event handler trait: one implementation per upstream source.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use inflow_core::{Envelope, RecordBatch, Result, Source};

/// Turns one queue envelope into zero or more canonical records.
///
/// Handlers classify errors rather than swallow them: transient upstream
/// failures bubble up so the dispatcher can re-lease the envelope, while a
/// 404 on hydration becomes a soft deletion in the returned batch.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn source(&self) -> Source;

    /// Process one envelope. An empty batch means "handled, nothing to
    /// store" (e.g. the entity predates the configured cutoff).
    async fn handle(&self, envelope: &Envelope) -> Result<RecordBatch>;
}

/// Whether an entity created at `created_at` falls before the configured
/// cutoff and should be acknowledged without being stored. Entities with
/// an unknown creation time are kept.
pub fn before_cutoff(
    created_at: Option<DateTime<Utc>>,
    cutoff: Option<DateTime<Utc>>,
) -> bool {
    match (created_at, cutoff) {
        (Some(created), Some(cutoff)) => created < cutoff,
        _ => false,
    }
}
