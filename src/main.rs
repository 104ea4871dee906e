//! tablo-sync binary
//!
//! `run` discovers appliances on the network and keeps each one's cache fresh
//! until Ctrl-C. The other subcommands edit a cache that already exists.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};

use tablo_sync::dvr::database::CacheDatabase;
use tablo_sync::dvr::models::QueueAction;
use tablo_sync::dvr::{cache_path, init_logging, open_appliances, run_worker};

const DEFAULT_DISCOVERY_URL: &str = "https://api.tablotv.com/assocserver/getipinfo/";

#[derive(Parser)]
#[command(author, version, about = "Keeps a local cache in sync with Tablo DVRs")]
struct Cli {
    /// Directory holding the caches and main.log (default: ~/.tablomanager)
    #[arg(long, env = "TABLO_SYNC_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long)]
    debug: bool,

    /// Minutes to wait between worker cycles
    #[arg(long, default_value_t = 15, env = "TABLO_SYNC_LOOP_DELAY")]
    loop_delay_minutes: u64,

    /// Appliance discovery endpoint
    #[arg(long, default_value = DEFAULT_DISCOVERY_URL, env = "TABLO_SYNC_DISCOVERY_URL")]
    discovery_url: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Discover appliances and sync them until interrupted
    Run,
    /// Queue a recording for export
    Export {
        server_id: String,
        /// Recording path on the appliance, e.g. /recordings/airings/123
        details: String,
        #[arg(long)]
        export_path: Option<String>,
    },
    /// Set the default export root of an appliance
    SetExportPath { server_id: String, path: String },
    /// Set the conflict priority of a show (lower wins)
    SetPriority {
        server_id: String,
        show_id: i64,
        priority: i64,
    },
}

fn default_data_dir() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    Ok(home.join(".tablomanager"))
}

fn open_existing(data_dir: &Path, server_id: &str) -> anyhow::Result<CacheDatabase> {
    let path = cache_path(data_dir, server_id);
    CacheDatabase::open_existing(&path)
        .with_context(|| format!("failed to open cache {}", path.display()))
}

async fn run(data_dir: &Path, discovery_url: &str, loop_delay: Duration) -> anyhow::Result<()> {
    let appliances = open_appliances(data_dir, discovery_url)
        .await
        .context("failed to prepare appliance caches")?;
    if appliances.is_empty() {
        info!("No appliances found");
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers: Vec<_> = appliances
        .into_iter()
        .map(|app| tokio::spawn(run_worker(app, loop_delay, shutdown_rx.clone())))
        .collect();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutdown requested, waiting for workers to finish their cycle");
    let _ = shutdown_tx.send(true);

    for worker in workers {
        if let Err(e) = worker.await {
            error!("Worker task failed: {}", e);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    let _guard = init_logging(&data_dir, cli.debug).context("failed to initialize logging")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let loop_delay = Duration::from_secs(cli.loop_delay_minutes * 60);
            run(&data_dir, &cli.discovery_url, loop_delay).await?;
        }
        Command::Export {
            server_id,
            details,
            export_path,
        } => {
            let db = open_existing(&data_dir, &server_id)?;
            let task_id = db.enqueue(&QueueAction::Export, &details, export_path.as_deref())?;
            info!("Queued export {} as task {}", details, task_id);
        }
        Command::SetExportPath { server_id, path } => {
            let db = open_existing(&data_dir, &server_id)?;
            db.set_default_export_path(Some(&path))?;
        }
        Command::SetPriority {
            server_id,
            show_id,
            priority,
        } => {
            let db = open_existing(&data_dir, &server_id)?;
            db.set_show_priority(show_id, priority)?;
            info!("Show {} priority set to {}", show_id, priority);
        }
    }
    Ok(())
}
