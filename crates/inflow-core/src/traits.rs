//! Repository and sink traits implemented by the database layer.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::models::{
    Checkpoint, EnqueueOutcome, Envelope, EnvelopeState, NewEnvelope, RecordBatch, Source,
    SourceQueueStats, WebhookRegistration,
};

/// Durable at-least-once work queue.
///
/// Envelopes stay visible until completed; leases expire so a crashed
/// worker's work is re-leased; enqueue is idempotent on the logical
/// envelope id.
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Insert an envelope. Returns `Duplicate` without side effects when a
    /// pending or leased row with the same logical id already exists; a
    /// completed or failed row is reset to pending instead, so a new
    /// upstream event for a retired id is never swallowed.
    async fn enqueue(&self, envelope: NewEnvelope) -> Result<EnqueueOutcome>;

    /// Enqueue a whole poll page. Returns the number of rows inserted or
    /// reset (duplicates are counted as success, not returned).
    async fn enqueue_batch(&self, envelopes: Vec<NewEnvelope>) -> Result<usize>;

    /// Lease up to `batch_size` envelopes for one source, oldest first.
    /// Each leased envelope has its attempt counter incremented. Expired
    /// leases are eligible again.
    async fn lease(
        &self,
        source: Source,
        batch_size: i64,
        lease_duration: Duration,
    ) -> Result<Vec<Envelope>>;

    /// Record a failure. With `permanent` set, or once the attempt cap is
    /// reached, the envelope moves to `failed`; otherwise it becomes
    /// pending again after the retry delay. Returns the attempt count.
    async fn fail(&self, id: i64, error: &str, permanent: bool) -> Result<i32>;

    /// Move a `failed` envelope back to `pending` with a fresh attempt
    /// budget. Operator path; returns false when the row is not failed.
    async fn requeue_failed(&self, id: i64) -> Result<bool>;

    /// List envelopes in a state, optionally filtered by source.
    async fn list(
        &self,
        state: EnvelopeState,
        source: Option<Source>,
        limit: i64,
    ) -> Result<Vec<Envelope>>;

    /// Per-source state counts for health reporting.
    async fn stats(&self) -> Result<Vec<SourceQueueStats>>;

    /// Delete completed envelopes older than the retention window.
    /// Pending, leased, and failed rows are never touched.
    async fn cleanup_completed(&self, retention_days: i64) -> Result<u64>;
}

/// Per-source poll high-water marks.
#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    async fn get(&self, source: Source) -> Result<Option<Checkpoint>>;

    /// Persist a checkpoint. `last_event_time` never moves backward; a
    /// write with an older timestamp only updates the cursor.
    async fn set(&self, checkpoint: &Checkpoint) -> Result<()>;
}

/// Upstream webhook registrations we own.
#[async_trait]
pub trait RegistrationRepository: Send + Sync {
    async fn list_for_source(&self, source: Source) -> Result<Vec<WebhookRegistration>>;
    async fn replace_for_source(
        &self,
        source: Source,
        registrations: Vec<WebhookRegistration>,
    ) -> Result<()>;
}

/// Idempotent canonical-record sink.
///
/// `commit` applies a record batch and retires the producing envelopes in
/// one transaction, so a crash can never leave a visible write without a
/// retired envelope (or vice versa).
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Whether attachments must be staged as bytes before upsert. The
    /// Postgres sink stores metadata plus source URL and returns false.
    fn requires_attachment_bytes(&self) -> bool {
        false
    }

    /// Atomically upsert `batch` and mark `envelope_ids` completed.
    /// Upserts merge: fields absent from a record leave stored values
    /// untouched. Deletions flip the soft-delete flag, never remove rows.
    async fn commit(&self, batch: &RecordBatch, envelope_ids: &[i64]) -> Result<()>;
}
