//! inflow - one-way connector mirroring Teamwork, Missive, and Craft into
//! PostgreSQL.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use inflow_api::{router, AppState};
use inflow_connectors::{CraftClient, IdentityCache, MissiveClient, TeamworkClient, UpstreamSource};
use inflow_core::{defaults, Config, EnvelopeState, Error, QueueRepository, Source};
use inflow_db::Database;
use inflow_sync::{
    CraftEventHandler, Dispatcher, DispatcherConfig, MissiveEventHandler, Poller, PollerConfig,
    TeamworkEventHandler, WebhookLifecycle,
};

/// One-way Teamwork/Missive/Craft → PostgreSQL mirror.
#[derive(Parser, Debug)]
#[command(name = "inflow")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the combined service: ingress, dispatcher, pollers.
    Serve,
    /// Run one poll cycle per source (or a single source) and exit.
    Backfill {
        /// Restrict the backfill to one source (teamwork, missive, craft).
        #[arg(long)]
        source: Option<String>,
    },
    /// Print queue depth and state counts per source.
    Queue,
    /// Move a failed envelope back to pending with a fresh attempt budget.
    Requeue {
        /// Envelope row id as printed by `inflow queue`.
        #[arg(long)]
        id: i64,
    },
    /// Validate configuration and exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve => serve().await,
        Command::Backfill { source } => backfill(source).await,
        Command::Queue => queue_report().await,
        Command::Requeue { id } => requeue(id).await,
        Command::CheckConfig => check_config(),
    }
}

/// Tracing setup: `LOG_LEVEL` feeds the filter default, `LOG_FORMAT=json`
/// switches to structured output, `RUST_LOG` overrides everything.
fn init_tracing() {
    let default_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_config() -> anyhow::Result<Config> {
    let config = Config::from_env();
    config.validate().map_err(|e| {
        error!(error = %e, "Refusing to start");
        anyhow::anyhow!(e)
    })?;
    Ok(config)
}

/// Everything the long-running service and the one-shot backfill share.
struct Runtime {
    config: Arc<Config>,
    db: Arc<Database>,
    teamwork: Arc<TeamworkClient>,
    missive: Arc<MissiveClient>,
    craft: Option<Arc<CraftClient>>,
    identity: Arc<IdentityCache>,
}

impl Runtime {
    async fn build(config: Config) -> anyhow::Result<Self> {
        let dsn = config
            .db_dsn
            .clone()
            .ok_or_else(|| Error::Config("DB_DSN is required".into()))?;
        let db = Arc::new(Database::connect_with_config(&dsn, &config).await?);

        let teamwork = Arc::new(TeamworkClient::new(
            config
                .teamwork
                .base_url
                .clone()
                .ok_or_else(|| Error::Config("TEAMWORK_BASE_URL is required".into()))?,
            config
                .teamwork
                .api_key
                .clone()
                .ok_or_else(|| Error::Config("TEAMWORK_API_KEY is required".into()))?,
        )?);
        let missive = Arc::new(MissiveClient::new(
            config
                .missive
                .api_token
                .clone()
                .ok_or_else(|| Error::Config("MISSIVE_API_TOKEN is required".into()))?,
        )?);
        let craft = match &config.craft.base_url {
            Some(base_url) => Some(Arc::new(CraftClient::new(base_url.clone())?)),
            None => None,
        };
        let identity = Arc::new(IdentityCache::new(&config.data_dir));

        Ok(Self {
            config: Arc::new(config),
            db,
            teamwork,
            missive,
            craft,
            identity,
        })
    }

    fn pollers(&self) -> Vec<Poller> {
        let overlap = chrono::Duration::seconds(self.config.backfill_overlap_secs);
        let queue = self.db.queue.clone() as Arc<dyn QueueRepository>;
        let checkpoints = self.db.checkpoints.clone();

        let mut pollers = vec![
            Poller::new(
                self.teamwork.clone() as Arc<dyn UpstreamSource>,
                queue.clone(),
                checkpoints.clone(),
                PollerConfig {
                    overlap,
                    seed_floor: self.config.teamwork.process_after,
                    seed_lookback: chrono::Duration::days(defaults::TEAMWORK_SEED_LOOKBACK_DAYS),
                    include_completed_on_initial_sync: self
                        .config
                        .teamwork
                        .include_completed_on_initial_sync,
                    ..Default::default()
                },
            ),
            Poller::new(
                self.missive.clone() as Arc<dyn UpstreamSource>,
                queue.clone(),
                checkpoints.clone(),
                PollerConfig {
                    overlap,
                    seed_floor: self.config.missive.process_after,
                    ..Default::default()
                },
            ),
        ];

        if let Some(craft) = &self.craft {
            pollers.push(Poller::new(
                craft.clone() as Arc<dyn UpstreamSource>,
                queue,
                checkpoints,
                PollerConfig {
                    overlap,
                    ..Default::default()
                },
            ));
        }

        pollers
    }

    fn dispatcher(&self) -> Dispatcher {
        let mut dispatcher = Dispatcher::new(
            self.db.queue.clone(),
            self.db.sink.clone(),
            DispatcherConfig::default(),
        )
        .with_work_notify(self.db.queue.work_notify())
        .with_handler(Arc::new(TeamworkEventHandler::new(
            self.teamwork.clone(),
            self.identity.clone(),
            self.config.teamwork.process_after,
        )))
        .with_handler(Arc::new(MissiveEventHandler::new(
            self.missive.clone(),
            self.config.missive.process_after,
        )));

        if let Some(craft) = &self.craft {
            dispatcher = dispatcher.with_handler(Arc::new(CraftEventHandler::new(craft.clone())));
        }
        dispatcher
    }

    /// Bootstrap the schema, retrying in the background if the database is
    /// not up yet. The service starts regardless; health reports degraded
    /// until the store is reachable.
    async fn ensure_schema_resilient(&self) {
        if self.db.ensure_schema().await.is_ok() {
            return;
        }
        warn!("Database unreachable at startup, retrying schema bootstrap in background");
        let db = self.db.clone();
        tokio::spawn(async move {
            let mut delay = Duration::from_secs(defaults::DB_RECONNECT_DELAY_SECS);
            loop {
                tokio::time::sleep(delay).await;
                match db.ensure_schema().await {
                    Ok(()) => {
                        info!("Schema bootstrap succeeded after retry");
                        return;
                    }
                    Err(e) => {
                        warn!(error = %e, "Schema bootstrap still failing");
                        delay = (delay * 2).min(Duration::from_secs(defaults::DB_RECONNECT_CAP_SECS));
                    }
                }
            }
        });
    }
}

async fn serve() -> anyhow::Result<()> {
    let config = load_config()?;
    let runtime = Runtime::build(config).await?;
    runtime.ensure_schema_resilient().await;

    // Webhook registrations follow the configured public URL; without one
    // (or with webhooks disabled) polling is the sole ingest channel.
    if runtime.config.disable_webhooks {
        info!("Webhooks disabled, relying on short-interval polling");
    } else if let Some(public_url) = runtime.config.public_url.clone() {
        let lifecycle = WebhookLifecycle::new(
            runtime.teamwork.clone(),
            runtime.missive.clone(),
            runtime.db.registrations.clone(),
        );
        if let Err(e) = lifecycle.reconcile(&public_url).await {
            warn!(error = %e, "Webhook reconciliation incomplete, polling covers the gap");
        }
    } else {
        warn!("PUBLIC_URL not set, skipping webhook registration; polling covers ingest");
    }

    let dispatcher_handle = runtime.dispatcher().start();

    // Hourly retention sweep: completed envelopes age out, failed ones stay.
    {
        let queue = runtime.db.queue.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                match queue.cleanup_completed(defaults::QUEUE_RETENTION_DAYS).await {
                    Ok(removed) if removed > 0 => {
                        info!(removed, "Cleaned up completed envelopes")
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Queue cleanup failed"),
                }
            }
        });
    }

    let poll_interval = Duration::from_secs(runtime.config.backfill_interval_secs);
    let poller_handles: Vec<_> = runtime
        .pollers()
        .into_iter()
        .map(|poller| poller.spawn(poll_interval))
        .collect();

    let state = AppState::new(runtime.db.clone(), runtime.config.clone());
    let app = router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], runtime.config.app_port));
    info!(%addr, "Starting ingress server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop accepting new leases; let in-flight batches finish.
    info!("Shutting down background tasks");
    for handle in poller_handles {
        handle.shutdown().await;
    }
    dispatcher_handle.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Termination signal received");
}

async fn backfill(source: Option<String>) -> anyhow::Result<()> {
    let config = load_config()?;
    let only: Option<Source> = match source {
        Some(s) => Some(s.parse().map_err(|e: Error| anyhow::anyhow!(e))?),
        None => None,
    };

    let runtime = Runtime::build(config).await?;
    runtime.db.ensure_schema().await?;

    for poller in runtime.pollers() {
        if let Some(only) = only {
            if poller.source() != only {
                continue;
            }
        }
        let source = poller.source();
        match poller.run_cycle().await {
            Ok(summary) => {
                println!(
                    "{source}: {} items across {} pages, {} newly enqueued, checkpoint {}",
                    summary.items,
                    summary.pages,
                    summary.enqueued,
                    summary.checkpoint.to_rfc3339(),
                );
            }
            Err(e) => {
                eprintln!("{source}: backfill failed: {e}");
                return Err(anyhow::anyhow!(e));
            }
        }
    }
    Ok(())
}

async fn queue_report() -> anyhow::Result<()> {
    let config = load_config()?;
    let dsn = config
        .db_dsn
        .clone()
        .ok_or_else(|| anyhow::anyhow!("DB_DSN is required"))?;
    let db = Database::connect_with_config(&dsn, &config).await?;
    db.ensure_schema().await?;

    let stats = db.queue.stats().await?;
    if stats.is_empty() {
        println!("queue is empty");
        return Ok(());
    }

    println!(
        "{:<10} {:>8} {:>8} {:>10} {:>8} {:>8}",
        "source", "pending", "leased", "completed", "failed", "stuck"
    );
    for s in &stats {
        println!(
            "{:<10} {:>8} {:>8} {:>10} {:>8} {:>8}",
            s.source, s.pending, s.leased, s.completed, s.failed, s.stuck
        );
    }

    let failed: i64 = stats.iter().map(|s| s.failed).sum();
    if failed > 0 {
        println!("\n{failed} failed envelope(s), oldest first:");
        for envelope in db.queue.list(EnvelopeState::Failed, None, 20).await? {
            println!(
                "  [{}] {} attempts={} error={}",
                envelope.id,
                envelope.envelope_id,
                envelope.attempts,
                envelope.last_error.as_deref().unwrap_or("-"),
            );
        }
    }
    Ok(())
}

async fn requeue(id: i64) -> anyhow::Result<()> {
    let config = load_config()?;
    let dsn = config
        .db_dsn
        .clone()
        .ok_or_else(|| anyhow::anyhow!("DB_DSN is required"))?;
    let db = Database::connect_with_config(&dsn, &config).await?;

    if db.queue.requeue_failed(id).await? {
        println!("envelope {id} requeued");
        Ok(())
    } else {
        eprintln!("envelope {id} is not in the failed state");
        Err(anyhow::anyhow!("nothing to requeue"))
    }
}

fn check_config() -> anyhow::Result<()> {
    let config = Config::from_env();
    match config.validate() {
        Ok(()) => {
            println!("configuration is valid");
            if !config.craft_enabled() {
                println!("note: CRAFT_BASE_URL unset, craft source disabled");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("{e}");
            Err(anyhow::anyhow!(e))
        }
    }
}
