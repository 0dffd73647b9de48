//! # inflow-core
//!
//! Core types, traits, and configuration for the inflow connector.
//!
//! This crate provides the foundational data structures and trait
//! definitions that the other inflow crates depend on: queue envelopes and
//! their lifecycle, per-source checkpoints, canonical task/email/document
//! records, the error taxonomy, and the configuration surface.

pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use config::{parse_process_after, Config, CraftConfig, MissiveConfig, TeamworkConfig};
pub use error::{Error, Result};
pub use models::{
    Attachment, Checkpoint, DocRecord, EmailRecord, EnqueueOutcome, Envelope, EnvelopeKind,
    EnvelopeState, NewEnvelope, RecordBatch, Source, SourceQueueStats, TaskRecord,
    WebhookRegistration,
};
pub use traits::{CheckpointRepository, QueueRepository, RecordSink, RegistrationRepository};
