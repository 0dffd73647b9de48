//! # inflow-sync
//!
//! Reconciliation engine for the inflow connector.
//!
//! This crate provides:
//! - Per-source event handlers that turn queue envelopes into canonical
//!   records (hydrate, normalize, soft-delete on 404)
//! - The dispatcher that leases envelopes and commits batches atomically
//! - The incremental poller with overlap-windowed checkpoints
//! - The webhook lifecycle manager
//!
//! ## Example
//!
//! ```rust,ignore
//! use inflow_sync::{Dispatcher, DispatcherConfig, TeamworkEventHandler};
//!
//! let dispatcher = Dispatcher::new(queue, sink, DispatcherConfig::default())
//!     .with_handler(Arc::new(TeamworkEventHandler::new(client, identity, None)))
//!     .with_work_notify(notify);
//! let handle = dispatcher.start();
//! // ...
//! handle.shutdown().await;
//! ```

pub mod craft_events;
pub mod dispatcher;
pub mod handler;
pub mod lifecycle;
pub mod missive_events;
pub mod poller;
pub mod teamwork_events;

pub use craft_events::CraftEventHandler;
pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherHandle};
pub use handler::{before_cutoff, EventHandler};
pub use lifecycle::{WebhookLifecycle, MISSIVE_EVENTS, TEAMWORK_EVENTS};
pub use missive_events::MissiveEventHandler;
pub use poller::{CycleSummary, Poller, PollerConfig, PollerHandle};
pub use teamwork_events::TeamworkEventHandler;
