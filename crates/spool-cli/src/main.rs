use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use spool_core::app::{HandlerError, ItemHandler, ReaperLoop, WorkerGroup, WorkerLoop};
use spool_core::queue::{OutboxItem, RetryPolicy};
use spool_core::{BoxId, ConfigError, ItemId, NewItem, QueueError, Store, StoreConfig, TenantId};

#[derive(Parser, Debug)]
#[command(name = "spool", about = "Outbox/inbox work queues in SQLite")]
struct Cli {
    /// TOML store configuration.
    #[arg(long, value_name = "FILE", global = true, default_value = "spool.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the queue tables if they do not exist.
    Init,
    /// Print outbox and inbox depth as JSON.
    Status {
        #[arg(long)]
        tenant: TenantId,
        /// Restrict to one box.
        #[arg(long = "box")]
        box_id: Option<BoxId>,
    },
    /// Release reservations older than the given age, once.
    Recover {
        #[arg(long)]
        tenant: TenantId,
        /// Defaults to `recovery_age_ms` from the config.
        #[arg(long)]
        older_than_ms: Option<u64>,
    },
    /// Enqueue a dependency chain for a fresh tenant and drain it.
    Demo {
        #[arg(long, default_value_t = 5)]
        items: usize,
        #[arg(long, default_value_t = 2)]
        workers: usize,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("json encode: {0}")]
    Json(#[from] serde_json::Error),
    #[error("interrupted")]
    Interrupted,
}

#[derive(Debug, Serialize, Deserialize)]
struct HelloPayload {
    name: String,
}

/// Fails the first `remaining_failures` deliveries, then greets.
struct HelloHandler {
    remaining_failures: AtomicU32,
}

#[async_trait]
impl ItemHandler for HelloHandler {
    async fn handle(&self, item: &OutboxItem) -> Result<(), HandlerError> {
        let p: HelloPayload = item
            .json_payload()
            .ok_or_else(|| HandlerError::new("missing payload"))?
            .map_err(|e| HandlerError::new(format!("json decode: {e}")))?;

        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(HandlerError::new(format!(
                "intentional failure (left={left})"
            )));
        }

        info!(item_id = %item.item_id, recipient = %item.recipient, "hello, {}", p.name);
        Ok(())
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_json(value: &impl Serialize) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run a synchronous store call off the async runtime.
async fn blocking<T: Send + 'static>(
    call: impl FnOnce() -> Result<T, QueueError> + Send + 'static,
) -> Result<T, CliError> {
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| QueueError::Blocking(e.to_string()))?
        .map_err(CliError::from)
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = StoreConfig::load(&cli.config)?;
    let store = {
        let config = config.clone();
        blocking(move || Store::open(config)).await?
    };

    match cli.command {
        Commands::Init => {
            info!(path = %config.path.display(), "queue tables ready");
        }
        Commands::Status { tenant, box_id } => {
            let outbox = store.outbox(tenant);
            let inbox = store.inbox(tenant);
            let report = blocking(move || {
                let (outbox, inbox) = match box_id {
                    Some(box_id) => (outbox.status_for_box(box_id)?, inbox.status_for_box(box_id)?),
                    None => (outbox.status()?, inbox.status()?),
                };
                Ok(serde_json::json!({ "outbox": outbox, "inbox": inbox }))
            })
            .await?;
            print_json(&report)?;
        }
        Commands::Recover {
            tenant,
            older_than_ms,
        } => {
            let age = older_than_ms.unwrap_or(config.recovery_age_ms);
            let reaper = ReaperLoop::new(
                store.outbox(tenant),
                store.inbox(tenant),
                Duration::from_millis(age),
                config.reaper_interval(),
            );
            print_json(&reaper.sweep_once().await?)?;
        }
        Commands::Demo { items, workers } => demo(&store, &config, items, workers).await?,
    }
    Ok(())
}

async fn demo(
    store: &Store,
    config: &StoreConfig,
    items: usize,
    workers: usize,
) -> Result<(), CliError> {
    let tenant = TenantId::generate();
    let box_id = BoxId::generate();
    let outbox = store.outbox(tenant);

    // each item waits for the previous one
    let chain: Vec<NewItem> = {
        let mut previous: Option<ItemId> = None;
        let mut chain = Vec::with_capacity(items);
        for n in 0..items {
            let item_id = ItemId::generate();
            let mut item = NewItem::new(box_id, item_id, format!("peer-{n}")).with_json_payload(
                &HelloPayload {
                    name: format!("recipient {n}"),
                },
            )?;
            if let Some(dep) = previous {
                item = item.depends_on(dep);
            }
            chain.push(item);
            previous = Some(item_id);
        }
        chain
    };
    {
        let outbox = outbox.clone();
        blocking(move || {
            for item in chain {
                outbox.insert(item)?;
            }
            Ok(())
        })
        .await?;
    }
    info!(tenant = %tenant, box_id = %box_id, items, "enqueued dependency chain");

    let handler = Arc::new(HelloHandler {
        remaining_failures: AtomicU32::new(2),
    });
    let retry = RetryPolicy {
        base_delay: Duration::from_millis(200),
        ..RetryPolicy::default()
    };

    let mut group = WorkerGroup::new();
    group.spawn_workers(
        workers,
        WorkerLoop::new(outbox.clone(), handler, retry, config.idle_poll()),
    );
    group.spawn_reaper(ReaperLoop::from_config(store, tenant, config));

    let drained = async {
        loop {
            let outbox = outbox.clone();
            let status = blocking(move || outbox.status()).await?;
            if status.total_rows == 0 {
                return Ok::<(), CliError>(());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    };

    let outcome = tokio::select! {
        result = drained => result,
        _ = tokio::signal::ctrl_c() => Err(CliError::Interrupted),
    };
    group.shutdown_and_join().await;
    outcome?;

    info!(tenant = %tenant, "outbox drained");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            warn!(error = %err, "spool failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
