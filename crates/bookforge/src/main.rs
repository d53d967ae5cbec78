use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use log::{error, info};
use tokio::sync::watch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use bookforge::config::{database_path, default_config_path, load_config};
use bookforge::pipeline::LogProgress;
use bookforge::worker::queue_stats;
use bookforge::{
    Collaborators, Database, Pipeline, PipelineConfig, Result, Worker, WorkerConfig, WorkerError,
};

const DEFAULT_FILTER: &str = "bookforge=info";
const LOG_FORMAT_ENV: &str = "BOOKFORGE_LOG_FORMAT";

fn init_logging() -> std::result::Result<(), String> {
    tracing_log::LogTracer::init().map_err(|e| e.to_string())?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_current_span(true)))
        .with((!json).then(|| fmt::layer().with_target(true)));

    tracing::subscriber::set_global_default(subscriber).map_err(|e| e.to_string())
}

fn run() -> Result<()> {
    let config_path = match std::env::args_os().nth(1) {
        Some(path) => PathBuf::from(path),
        None => default_config_path().ok_or(WorkerError::NoHomeDirectory("config"))?,
    };
    info!("Loading configuration from {}", config_path.display());
    let config = load_config(&config_path)?;

    let db_path = database_path(&config).ok_or(WorkerError::NoHomeDirectory("database"))?;
    let db = Database::open(&db_path)?;
    info!("Database at {}: {}", db_path.display(), queue_stats(&db)?);

    let collaborators = Collaborators::from_config(&config)?;
    let pipeline = Pipeline::new(
        db.clone(),
        collaborators,
        Arc::new(PipelineConfig::from_config(&config)),
    );
    let worker = Worker::new(
        db,
        pipeline,
        Arc::new(LogProgress),
        WorkerConfig::from_config(&config),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        info!("Shutdown requested; finishing the current job");
        let _ = shutdown_tx.send(true);
    })
    .map_err(|e| WorkerError::SignalHandler(e.to_string()))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(WorkerError::Runtime)?;
    let state = runtime.block_on(worker.run(shutdown_rx));

    info!(
        "Processed {} job(s): {} completed, {} requeued, {} failed",
        state.claimed, state.completed, state.requeued, state.failed
    );
    Ok(())
}

fn main() -> ExitCode {
    if let Err(e) = init_logging() {
        eprintln!("Failed to initialise logging: {}", e);
    }

    info!("Starting bookforge worker v{}", env!("CARGO_PKG_VERSION"));

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
