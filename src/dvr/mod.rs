//! DVR cache synchronizer
//!
//! Keeps one local cache per appliance in step with the appliance's guide,
//! schedule and recordings, and unschedules airings that conflict or whose
//! content is already exported.

pub mod api;
pub mod client;
pub mod conflicts;
pub mod database;
pub mod error;
pub mod exports;
pub mod models;
pub mod refresh;
pub mod scheduler;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use tracing_appender::non_blocking::WorkerGuard;

use crate::dvr::client::ApplianceClient;
use crate::dvr::database::CacheDatabase;
use crate::dvr::error::{Result, SyncError};
use crate::dvr::exports::sanitize_file;
use crate::dvr::models::SystemInfo;
use crate::dvr::scheduler::{run_cycle, LoggingExporter, RecordingExporter};

/// Source of "now" in Unix seconds
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Everything one appliance worker needs
pub struct Appliance {
    pub info: SystemInfo,
    pub db: CacheDatabase,
    pub client: ApplianceClient,
    exporter: Arc<dyn RecordingExporter>,
    clock: Clock,
}

impl Appliance {
    pub fn new(info: SystemInfo, db: CacheDatabase, client: ApplianceClient) -> Self {
        Self {
            info,
            db,
            client,
            exporter: Arc::new(LoggingExporter),
            clock: Arc::new(|| chrono::Utc::now().timestamp()),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_exporter(mut self, exporter: Arc<dyn RecordingExporter>) -> Self {
        self.exporter = exporter;
        self
    }

    pub fn now(&self) -> i64 {
        (self.clock)()
    }
}

impl std::fmt::Display for Appliance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Name: {}, ID: {}, IP: {}",
            self.info.name, self.info.server_id, self.info.private_ip
        )
    }
}

/// Cache file of an appliance inside `data_dir`
pub fn cache_path(data_dir: &Path, server_id: &str) -> PathBuf {
    data_dir.join(format!("{}.cache", sanitize_file(server_id)))
}

/// Open the appliance's cache, replacing it when it cannot be opened
///
/// A cache written by a newer version is never discarded.
pub fn open_cache(data_dir: &Path, info: &SystemInfo) -> Result<CacheDatabase> {
    let path = cache_path(data_dir, &info.server_id);
    if path.exists() {
        match CacheDatabase::open(&path, info) {
            Ok(db) => return Ok(db),
            Err(e @ SyncError::IncompatibleCache { .. }) => return Err(e),
            Err(e) => {
                warn!("Discarding unreadable cache {:?}: {}", path, e);
                std::fs::remove_file(&path)?;
                for suffix in ["-wal", "-shm"] {
                    let mut sidecar = path.clone().into_os_string();
                    sidecar.push(suffix);
                    if let Err(e) = std::fs::remove_file(&sidecar) {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            debug!("Could not remove {:?}: {}", sidecar, e);
                        }
                    }
                }
            }
        }
    }

    info!("Creating new cache for {}", info.server_id);
    CacheDatabase::open(&path, info)
}

/// Discover appliances and open a cache for each
///
/// Any cache that cannot be opened aborts startup.
pub async fn open_appliances(data_dir: &Path, discovery_url: &str) -> Result<Vec<Appliance>> {
    let found = client::discover(discovery_url).await?;

    let mut appliances = Vec::with_capacity(found.len());
    for appliance in found {
        let info = SystemInfo::from(appliance);
        let db = open_cache(data_dir, &info)?;
        let client = ApplianceClient::new(&info.private_ip);
        appliances.push(Appliance::new(info, db, client));
    }
    Ok(appliances)
}

/// Run cycles for one appliance until `shutdown` flips to true
///
/// Shutdown is only observed between cycles.
pub async fn run_worker(app: Appliance, loop_delay: Duration, mut shutdown: watch::Receiver<bool>) {
    let span = info_span!("appliance", server_id = %app.info.server_id);

    async move {
        info!("Worker started: {}", app);
        loop {
            match run_cycle(&app).await {
                Ok(report) if report.failed.is_empty() => {
                    info!("Cycle complete, {} queue records processed", report.processed)
                }
                Ok(report) => warn!(
                    "Cycle complete, {} queue records processed, {} failed",
                    report.processed,
                    report.failed.len()
                ),
                Err(e) => error!("Cycle abandoned: {}", e),
            }

            if *shutdown.borrow() {
                break;
            }

            info!("Pausing for {} minutes", loop_delay.as_secs() / 60);
            tokio::select! {
                _ = tokio::time::sleep(loop_delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            if *shutdown.borrow() {
                break;
            }
        }
        info!("Worker stopped");
    }
    .instrument(span)
    .await
}

/// Initialize logging to stdout and `<data_dir>/main.log`
///
/// `RUST_LOG` overrides the level chosen by `debug_logging`. Keep the returned
/// guard alive for as long as the file should receive output.
pub fn init_logging(data_dir: &Path, debug_logging: bool) -> anyhow::Result<WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug_logging {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    std::fs::create_dir_all(data_dir)?;
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(data_dir, "main.log"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .try_init()?;

    Ok(guard)
}
