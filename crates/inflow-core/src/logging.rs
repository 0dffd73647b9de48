//! Structured logging field name constants for inflow.
//!
//! All crates use these constants for consistent structured logging fields,
//! so every failure can be grepped by `source` and `external_id` after the
//! fact.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, cycle/batch completions |
//! | DEBUG | Decision points, per-envelope outcomes |
//! | TRACE | Per-item iteration, page contents |

/// Subsystem originating the log event.
/// Values: "api", "queue", "poller", "dispatcher", "connector", "lifecycle"
pub const SUBSYSTEM: &str = "subsystem";

/// Logical operation name.
/// Examples: "enqueue", "lease", "poll_cycle", "reconcile"
pub const OPERATION: &str = "op";

/// Upstream source of the entity ("teamwork", "missive", "craft").
pub const SOURCE: &str = "source";

/// Upstream entity id being operated on.
pub const EXTERNAL_ID: &str = "external_id";

/// Logical envelope id (`source:external_id:kind`).
pub const ENVELOPE_ID: &str = "envelope_id";

/// Envelope event kind.
pub const KIND: &str = "kind";

/// Attempt counter after the current lease.
pub const ATTEMPTS: &str = "attempts";

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of items in a page, batch, or cycle.
pub const ITEM_COUNT: &str = "item_count";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
