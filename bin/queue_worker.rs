//! # Queue Worker
//!
//! Runs the hypervisor queue engine for one network, or performs operator
//! actions on its queue.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin queue_worker -- --network ethereum run
//! cargo run --bin queue_worker -- --network ethereum --types price,block drain
//! cargo run --bin queue_worker -- --network ethereum stuck
//! cargo run --bin queue_worker -- --network ethereum unlock price_1000_0xabc --reset-count
//! ```
//!
//! `run` stops gracefully on Ctrl+C.

use anyhow::Result;
use clap::{Parser, Subcommand};
use hypervisor_queue::{
    database::{self, PgStore, Store},
    memory_store::MemoryStore,
    orchestrator::Orchestrator,
    queue_item::QueueItemType,
    settings::Settings,
};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(name = "queue_worker", about = "Hypervisor queue engine")]
struct Cli {
    /// Network whose queue is processed
    #[arg(long)]
    network: String,

    /// Restrict claims to these work types (comma separated)
    #[arg(long, value_delimiter = ',')]
    types: Vec<String>,

    /// Override `queue.workers`
    #[arg(long)]
    workers: Option<usize>,

    /// Configuration file
    #[arg(long, default_value = "Config.toml")]
    config: String,

    /// Use the in-memory store instead of PostgreSQL
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Workers, lease reaper and operation feed until Ctrl+C
    Run,
    /// Process until nothing is claimable, then exit
    Drain,
    /// List parked or refused items awaiting unlock
    Stuck,
    /// Release a stuck item
    Unlock {
        id: String,
        #[arg(long)]
        reset_count: bool,
    },
}

fn init_logging(settings: &Settings) {
    #[cfg(feature = "observability")]
    if settings.log.json {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log.level));
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
        return;
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&settings.log.level))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let mut settings = Settings::from_file(&cli.config)?;
    if let Some(workers) = cli.workers {
        settings.queue.workers = workers.max(1);
    }
    init_logging(&settings);

    #[cfg(feature = "observability")]
    if let Some(addr) = &settings.log.metrics_addr {
        hypervisor_queue::metrics::install_exporter(addr.parse()?)?;
    }

    let instance = uuid::Uuid::new_v4();
    log::info!(
        "🚀 Starting queue worker {} for {} ({} workers)",
        instance,
        cli.network,
        settings.queue.workers
    );

    let types: Option<Vec<QueueItemType>> = if cli.types.is_empty() {
        None
    } else {
        let mut parsed = Vec::with_capacity(cli.types.len());
        for t in &cli.types {
            parsed.push(t.parse::<QueueItemType>()?);
        }
        Some(parsed)
    };

    let store: Arc<dyn Store> = if cli.dry_run || settings.database.url.is_empty() {
        log::warn!("⚠️ Using the in-memory store, nothing will be persisted");
        Arc::new(MemoryStore::new())
    } else {
        let pool = database::connect(&settings.database.url, settings.database.max_connections).await?;
        Arc::new(PgStore::new(pool))
    };

    let soft_retry_limit = settings.queue.soft_retry_limit;
    let orchestrator = Orchestrator::from_settings(&cli.network, settings, store)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if signal::ctrl_c().await.is_ok() {
                    log::info!("🛑 Ctrl+C received, shutting down...");
                    let _ = shutdown_tx.send(true);
                }
            });
            orchestrator.run(types, shutdown_rx).await?;
        }
        Command::Drain => {
            let processed = orchestrator.drain(types.as_deref()).await?;
            log::info!("✅ Drained {} items from {}", processed, cli.network);
        }
        Command::Stuck => {
            let stuck = orchestrator
                .queue()
                .stuck_items(&cli.network, soft_retry_limit)
                .await?;
            for doc in &stuck {
                println!("{}\t{}\tcount={}\tprocessing={}", doc.id, doc.item_type, doc.count, doc.processing);
            }
            log::info!("{} stuck items on {}", stuck.len(), cli.network);
        }
        Command::Unlock { id, reset_count } => {
            if orchestrator.queue().unlock(&cli.network, &id, reset_count).await? {
                log::info!("🔓 {} unlocked", id);
            } else {
                log::warn!("⚠️ No queue item {} on {}", id, cli.network);
            }
        }
    }

    Ok(())
}
