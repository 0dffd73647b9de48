//! Centralized default constants for the inflow connector.
//!
//! **This module is the single source of truth** for all shared default
//! values. Crates reference these constants instead of defining their own
//! magic numbers.

// =============================================================================
// QUEUE
// =============================================================================

/// Maximum attempts before an envelope moves to the `failed` state.
pub const MAX_QUEUE_ATTEMPTS: i32 = 3;

/// Minimum delay between retries of a failed envelope, in seconds.
pub const SPOOL_RETRY_SECS: u64 = 60;

/// Number of envelopes leased per dispatcher batch.
pub const LEASE_BATCH_SIZE: i64 = 10;

/// Lease duration in seconds. Must exceed `HANDLER_TIMEOUT_SECS` so an
/// expired lease never races a call that is still in flight.
pub const LEASE_SECS: u64 = 300;

/// Dispatcher polling interval when the queue is empty, in milliseconds.
pub const DISPATCH_POLL_INTERVAL_MS: u64 = 500;

/// Completed envelopes older than this are eligible for cleanup, in days.
pub const QUEUE_RETENTION_DAYS: i64 = 7;

/// Leased envelopes whose lease expired more than this long ago are
/// counted as stuck in queue stats, in minutes.
pub const STUCK_THRESHOLD_MINUTES: i64 = 30;

// =============================================================================
// POLLING
// =============================================================================

/// Poller period when webhooks are active (safety net), in seconds.
pub const BACKFILL_INTERVAL_SECS: u64 = 60;

/// Poller period when webhooks are disabled (primary channel), in seconds.
pub const BACKFILL_INTERVAL_NO_WEBHOOKS_SECS: u64 = 5;

/// Overlap subtracted from the checkpoint on each poll cycle, in seconds.
/// Absorbs clock skew and webhook/API propagation races.
pub const BACKFILL_OVERLAP_SECS: i64 = 120;

/// Maximum pages fetched per source per poll cycle.
pub const BACKFILL_PAGE_CAP: u32 = 20;

/// Checkpoint seed lookback for Teamwork when no cutoff is configured, in days.
pub const TEAMWORK_SEED_LOOKBACK_DAYS: i64 = 365;

/// Checkpoint seed lookback for Missive and Craft, in days.
pub const SEED_LOOKBACK_DAYS: i64 = 30;

// =============================================================================
// UPSTREAM CLIENTS
// =============================================================================

/// Per-request timeout for upstream HTTP calls, in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Total budget for one handler invocation including retries, in seconds.
pub const HANDLER_TIMEOUT_SECS: u64 = 240;

/// Maximum retries per upstream call before surfacing a transient error.
pub const CLIENT_MAX_RETRIES: u32 = 5;

/// Exponential backoff base delay, in seconds.
pub const BACKOFF_BASE_SECS: u64 = 1;

/// Exponential backoff cap, in seconds.
pub const BACKOFF_CAP_SECS: u64 = 60;

/// Default per-client request rate ceiling, requests per second.
pub const CLIENT_RATE_LIMIT_PER_SEC: u32 = 5;

/// Teamwork list page size.
pub const TEAMWORK_PAGE_SIZE: u32 = 100;

/// Missive conversation list page size.
pub const MISSIVE_PAGE_SIZE: u32 = 50;

// =============================================================================
// SINK
// =============================================================================

/// Maximum records per sink upsert statement batch.
pub const SINK_BATCH_SIZE: usize = 10;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP listen port.
pub const APP_PORT: u16 = 5000;

/// Default display timezone. Storage is always UTC.
pub const TIMEZONE: &str = "Europe/Berlin";

// =============================================================================
// IDENTITY CACHE
// =============================================================================

/// TTL before the in-memory identity maps are refreshed, in seconds.
pub const IDENTITY_TTL_SECS: u64 = 60;

/// Directory for on-disk identity snapshots, relative to the working dir.
pub const DATA_DIR: &str = "data";

// =============================================================================
// DATABASE
// =============================================================================

/// Maximum connections in the Postgres pool.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Initial reconnect delay after a lost connection, in seconds.
pub const DB_RECONNECT_DELAY_SECS: u64 = 5;

/// Reconnect delay cap, in seconds.
pub const DB_RECONNECT_CAP_SECS: u64 = 60;
