//! Campsync Server - Main entry point

use anyhow::{Context, Result};
use axum::Router;
use campsync_common::logging::{init_logging, LogConfig};
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tracing::info;

use campsync_server::{
    config::Config,
    features, middleware,
    sync::{
        build_registry,
        store::{MemoryStore, PgRecordStore},
        Catalog, HttpSource, RecordStore, SequenceReport, SyncScheduler,
    },
};

#[derive(Parser, Debug)]
#[command(name = "campsync-server", version, about = "Camp data sync server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API and run the sync scheduler
    Serve {
        /// Use the in-process store instead of Postgres
        #[arg(long)]
        memory: bool,
    },
    /// Run one sequence and exit
    Run {
        sequence: SequenceKind,
        #[arg(long)]
        memory: bool,
    },
    /// Sync a past camp year and exit
    Historical {
        #[arg(long)]
        year: i32,
        #[arg(long)]
        include_expensive: bool,
        #[arg(long)]
        memory: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SequenceKind {
    Daily,
    Weekly,
    CustomValues,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .log_file_prefix("campsync-server")
        .filter_directives("campsync_server=debug,tower_http=info,sqlx=warn")
        .build()
        .merge_env()?;
    init_logging(&log_config)?;

    let config = Config::load().context("Failed to load configuration")?;

    match cli.command {
        Command::Serve { memory } => serve(config, memory).await,
        Command::Run { sequence, memory } => {
            let scheduler = build_scheduler(&config, memory).await?;
            let report = match sequence {
                SequenceKind::Daily => scheduler.run_daily().await?,
                SequenceKind::Weekly => scheduler.run_weekly().await?,
                SequenceKind::CustomValues => scheduler.run_custom_values().await?,
            };
            finish(report)
        },
        Command::Historical {
            year,
            include_expensive,
            memory,
        } => {
            let scheduler = build_scheduler(&config, memory).await?;
            finish(scheduler.run_historical(year, include_expensive).await?)
        },
    }
}

async fn build_store(config: &Config, memory: bool) -> Result<Arc<dyn RecordStore>> {
    if memory {
        info!("Using in-memory record store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_secs))
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;
    info!("Database connection pool established");

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    info!("Database migrations completed");

    Ok(Arc::new(PgRecordStore::new(pool)))
}

async fn build_scheduler(config: &Config, memory: bool) -> Result<SyncScheduler> {
    let store = build_store(config, memory).await?;
    let source = Arc::new(HttpSource::new(
        config.sync.source_base_url.clone(),
        config.sync.current_year,
        config.sync.source_timeout(),
    )?);

    let registry = build_registry(&config.sync, source, store.clone());
    info!(jobs = registry.len(), year = config.sync.current_year, "Sync jobs registered");

    Ok(SyncScheduler::new(registry, Catalog::default(), store, config.sync.clone()))
}

fn finish(report: SequenceReport) -> Result<()> {
    info!(
        sequence = %report.name,
        jobs = report.jobs.len(),
        skipped = report.skipped.len(),
        success = report.is_success(),
        "Sequence complete"
    );
    if report.is_success() {
        Ok(())
    } else {
        anyhow::bail!("Sequence {} finished with failed or skipped jobs", report.name)
    }
}

async fn serve(config: Config, memory: bool) -> Result<()> {
    info!("Starting campsync server");

    let scheduler = build_scheduler(&config, memory).await?;
    if !config.sync.enabled {
        info!("Sync cadence disabled (SYNC_ENABLED=false); only queued and on-demand runs execute");
    }
    let coordinator = scheduler.start();

    let app = Router::new()
        .nest("/api/v1", features::router(features::FeatureState {
            scheduler: scheduler.clone(),
        }))
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    scheduler.shutdown();
    if let Err(e) = coordinator.await {
        tracing::error!("Scheduler task ended abnormally: {}", e);
    }

    info!("Server shut down gracefully");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting graceful shutdown"),
        _ = terminate => info!("Received terminate signal, starting graceful shutdown"),
    }

    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
