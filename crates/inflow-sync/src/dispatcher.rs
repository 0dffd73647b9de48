//! Dispatcher: leases envelopes, routes them to source handlers, and
//! commits canonical records through the sink.
//!
//! Envelopes from one source are processed serially; sources interleave
//! freely. The commit path ties each batch's upserts and envelope
//! retirement into one sink transaction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Notify};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, warn};

use inflow_core::{
    defaults, Envelope, Error, QueueRepository, RecordBatch, RecordSink, Result, Source,
};

use crate::handler::EventHandler;

/// Configuration for the dispatcher loop.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Envelopes leased per source per round.
    pub batch_size: i64,
    /// Lease duration; strictly above the handler timeout.
    pub lease_duration: Duration,
    /// Budget for one handler invocation, including upstream retries.
    pub handler_timeout: Duration,
    /// Sleep between rounds when every queue is empty.
    pub poll_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::LEASE_BATCH_SIZE,
            lease_duration: Duration::from_secs(defaults::LEASE_SECS),
            handler_timeout: Duration::from_secs(defaults::HANDLER_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(defaults::DISPATCH_POLL_INTERVAL_MS),
        }
    }
}

/// Handle for controlling a running dispatcher.
pub struct DispatcherHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: tokio::task::JoinHandle<()>,
}

impl DispatcherHandle {
    /// Signal the dispatcher to stop after the in-flight round and wait
    /// for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.join.await;
    }
}

/// The dispatcher itself. Single task; per-source serial processing.
pub struct Dispatcher {
    queue: Arc<dyn QueueRepository>,
    sink: Arc<dyn RecordSink>,
    handlers: HashMap<Source, Arc<dyn EventHandler>>,
    config: DispatcherConfig,
    /// Wake signal from the queue so fresh work is picked up immediately.
    work_notify: Option<Arc<Notify>>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn QueueRepository>,
        sink: Arc<dyn RecordSink>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            queue,
            sink,
            handlers: HashMap::new(),
            config,
            work_notify: None,
        }
    }

    /// Register the handler for one source.
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(handler.source(), handler);
        self
    }

    pub fn with_work_notify(mut self, notify: Arc<Notify>) -> Self {
        self.work_notify = Some(notify);
        self
    }

    /// Start the dispatcher loop and return a control handle.
    pub fn start(self) -> DispatcherHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let join = tokio::spawn(async move {
            self.run(shutdown_rx).await;
        });
        DispatcherHandle { shutdown_tx, join }
    }

    #[instrument(skip_all)]
    async fn run(&self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(
            subsystem = "dispatcher",
            sources = self.handlers.len(),
            batch_size = self.config.batch_size,
            "Dispatcher started"
        );

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!(subsystem = "dispatcher", "Dispatcher received shutdown signal");
                break;
            }

            let mut processed = 0usize;
            for source in self.handlers.keys().copied().collect::<Vec<_>>() {
                match self.process_source(source).await {
                    Ok(count) => processed += count,
                    Err(e) => {
                        // Queue/database trouble: back off and let the pool
                        // reconnect rather than spinning.
                        error!(
                            subsystem = "dispatcher",
                            source = %source,
                            error = %e,
                            "Round failed"
                        );
                        sleep(Duration::from_secs(defaults::DB_RECONNECT_DELAY_SECS)).await;
                    }
                }
            }

            if processed == 0 {
                // Queue empty: sleep until the interval elapses, new work
                // arrives, or shutdown is requested.
                let wait = sleep(self.config.poll_interval);
                match &self.work_notify {
                    Some(notify) => {
                        tokio::select! {
                            _ = shutdown_rx.recv() => {
                                info!(subsystem = "dispatcher", "Dispatcher received shutdown signal");
                                break;
                            }
                            _ = notify.notified() => {}
                            _ = wait => {}
                        }
                    }
                    None => {
                        tokio::select! {
                            _ = shutdown_rx.recv() => {
                                info!(subsystem = "dispatcher", "Dispatcher received shutdown signal");
                                break;
                            }
                            _ = wait => {}
                        }
                    }
                }
            }
        }

        info!(subsystem = "dispatcher", "Dispatcher stopped");
    }

    /// Lease and process one batch for one source. Returns the number of
    /// envelopes taken off the queue (completed or failed).
    pub async fn process_source(&self, source: Source) -> Result<usize> {
        let Some(handler) = self.handlers.get(&source) else {
            return Ok(0);
        };

        let envelopes = self
            .queue
            .lease(source, self.config.batch_size, self.config.lease_duration)
            .await?;
        if envelopes.is_empty() {
            return Ok(0);
        }

        let start = Instant::now();
        let mut batch = RecordBatch::default();
        let mut to_complete: Vec<i64> = Vec::new();
        let mut handled = 0usize;

        for envelope in &envelopes {
            match self.run_handler(handler.as_ref(), envelope).await {
                Ok(records) => {
                    batch.extend(records);
                    to_complete.push(envelope.id);
                    handled += 1;
                }
                Err(e) => {
                    let permanent = !e.is_transient();
                    let attempts = self
                        .queue
                        .fail(envelope.id, &e.to_string(), permanent)
                        .await?;
                    warn!(
                        subsystem = "dispatcher",
                        source = %source,
                        external_id = %envelope.external_id,
                        envelope_id = %envelope.envelope_id,
                        attempts,
                        permanent,
                        error = %e,
                        "Envelope failed"
                    );
                    handled += 1;
                }
            }
        }

        if !to_complete.is_empty() {
            if let Err(e) = self.sink.commit(&batch, &to_complete).await {
                // The transaction rolled back as a whole; every envelope in
                // it goes back to the queue as a transient failure.
                warn!(
                    subsystem = "dispatcher",
                    source = %source,
                    item_count = to_complete.len(),
                    error = %e,
                    "Sink commit failed, envelopes will retry"
                );
                for id in &to_complete {
                    self.queue
                        .fail(*id, &format!("sink commit failed: {e}"), false)
                        .await?;
                }
                return Ok(handled);
            }

            debug!(
                subsystem = "dispatcher",
                source = %source,
                item_count = batch.len(),
                retired = to_complete.len(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Batch committed"
            );
        }

        Ok(handled)
    }

    /// One handler invocation under the total-call timeout.
    async fn run_handler(
        &self,
        handler: &dyn EventHandler,
        envelope: &Envelope,
    ) -> Result<RecordBatch> {
        match timeout(self.config.handler_timeout, handler.handle(envelope)).await {
            Ok(result) => result,
            Err(_) => Err(Error::TransientUpstream(format!(
                "handler exceeded {}s budget",
                self.config.handler_timeout.as_secs()
            ))),
        }
    }
}
