//! # inflow-api
//!
//! HTTP ingress (webhook endpoints + health) and service wiring for the
//! inflow connector. The `inflow` binary in this crate carries the CLI
//! entry points: `serve`, `backfill`, `queue`, and `check-config`.

pub mod ingest;
pub mod server;
pub mod signature;

pub use ingest::parse_webhook;
pub use server::{router, AppState};
pub use signature::{sign, verify_signature};
