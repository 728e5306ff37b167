// vrsync entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file)
// 2. Load config
// 3. Open database
// 4. Build the VR API client and the importer
// 5. Spawn the status logger
// 6. Run imports on the configured interval until Ctrl+C

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info};

use vrsync_core::config;
use vrsync_core::db;
use vrsync_core::error::ImportError;
use vrsync_core::tournament::TournamentImporter;
use vrsync_core::vrapi::VrApiClient;

/// How often the progress of a running import is written to the log.
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("vrsync starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: api={}, upload_limit={}, box ladder reload {}%",
        config.vrapi.base_url,
        config.import.upload_limit,
        config.import.box_ladder_force_reload_percent
    );
    if config.credentials.vrapi_user.is_none() {
        info!("No VR API credentials configured; requests are unauthenticated");
    }

    // 3. Open database
    let db = Arc::new(db::Database::open(&config.db_path).context("failed to open database")?);
    info!("Database opened at {}", config.db_path);

    // 4. Build client and importer
    let client = VrApiClient::from_config(&config).context("failed to build VR API client")?;
    let importer = Arc::new(TournamentImporter::for_vr(
        Arc::new(client),
        db.clone(),
        config.import.clone(),
    ));

    // 5. Status logger
    let status_handle = tokio::spawn(log_status(importer.clone()));

    // 6. Import loop
    let interval_minutes = config.import.interval_minutes;
    let result = tokio::select! {
        r = run_imports(&importer, interval_minutes) => r,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, shutting down");
            Ok(())
        }
    };

    status_handle.abort();

    match db.tournament_count() {
        Ok(n) => info!("{n} tournaments stored"),
        Err(e) => error!("Failed to count tournaments: {e:#}"),
    }
    info!("vrsync shut down");
    result
}

/// Run one import, or one every `interval_minutes` when that is non-zero.
async fn run_imports(importer: &TournamentImporter, interval_minutes: u64) -> anyhow::Result<()> {
    if interval_minutes == 0 {
        importer
            .import_tournaments()
            .await
            .context("tournament import failed")?;
        return Ok(());
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_minutes * 60));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match importer.import_tournaments().await {
            Ok(()) => {}
            Err(ImportError::AlreadyRunning) => info!("Import still running, skipping this tick"),
            // A failed run is retried on the next tick; its stats stay IN_PROGRESS.
            Err(e) => error!("Tournament import failed: {e}"),
        }
    }
}

async fn log_status(importer: Arc<TournamentImporter>) {
    let mut ticker = tokio::time::interval(STATUS_LOG_INTERVAL);
    loop {
        ticker.tick().await;
        if importer.is_running() {
            info!(status = %importer.import_status(), "import progress");
        }
    }
}

/// Initialize tracing to log to `logs/vrsync.log`.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("vrsync.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("vrsync=info,vrsync_core=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
