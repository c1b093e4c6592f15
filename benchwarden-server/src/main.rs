//! # Benchwarden Server
//!
//! Runs the scan and schedule controllers against an in-memory resource
//! store, executes benchmark jobs as child processes, and serves the
//! admission API and metrics endpoint.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use benchwarden_config::{ConfigLoad, ConfigLoader};
use benchwarden_core::{
    ScanError,
    clock::SystemClock,
    environment::ClusterInfo,
    metrics::MetricsAggregator,
    orchestration::{
        ControllerRuntime, InMemoryResourceStore, InProcEventBus, JobRunner,
        ProcessJobRunner, ReconcileContext, ResourceStore,
    },
    registration::ensure_registered,
    types::ResourceKind,
};
use benchwarden_server::{AppState, create_app};

const EVENT_BUS_CAPACITY: usize = 1_024;

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "benchwarden-server")]
#[command(about = "Security-benchmark scan controller with an HTTP admission surface")]
struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short, long, env = "BENCHWARDEN_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Server host (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,

    /// Server port (overrides config)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Scan reconciler workers (overrides config)
    #[arg(long, env = "BENCHWARDEN_SCAN_WORKERS")]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = cli.config.clone() {
        loader = loader.with_config_path(path);
    }
    let ConfigLoad {
        mut config,
        warnings,
    } = loader.load().context("failed to load configuration")?;

    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(workers) = cli.workers {
        anyhow::ensure!(workers > 0, "--workers must be at least 1");
        config.reconciler.controller.scan_workers = workers;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Override via RUST_LOG.
                "info,scan::reconcile=info,tower_http=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    info!(source = ?config.metadata.source, "configuration loaded");
    for warning in warnings.iter() {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }

    let controller_cfg = &config.reconciler.controller;
    info!(
        controller.scan_workers = controller_cfg.scan_workers,
        controller.schedule_workers = controller_cfg.schedule_workers,
        controller.resync_secs = controller_cfg.resync_interval_secs,
        retry.max_attempts = config.reconciler.retry.max_attempts,
        runner.program = %config.runner.program,
        "reconciler configuration in effect"
    );

    let store = Arc::new(InMemoryResourceStore::new(
        controller_cfg.watch_channel_capacity,
    ));
    ensure_registered(
        store.as_ref(),
        &ResourceKind::ALL,
        config.registration.timeout,
    )
    .await
    .context("resource registration did not complete")?;

    let cluster = ClusterInfo::detect(&config.environment())
        .await
        .context("cluster detection failed")?;
    let default_profile = config.selection.select(&cluster).to_string();
    let profiles = config
        .profile_catalog()
        .context("invalid profile catalog")?
        .with_default(Some(default_profile.clone()));
    if profiles.get(&default_profile).is_none() {
        warn!(
            profile = %default_profile,
            "selected default profile is not in the catalog; scans without an explicit profile will fail"
        );
    } else {
        info!(profile = %default_profile, "default profile selected");
    }

    let metrics = Arc::new(MetricsAggregator::new());
    let profiles = Arc::new(profiles);
    let runner: Arc<dyn JobRunner> =
        Arc::new(ProcessJobRunner::new(config.runner.clone()));
    let ctx = ReconcileContext {
        store: store.clone(),
        runner: runner.clone(),
        metrics: metrics.clone(),
        events: Arc::new(InProcEventBus::new(EVENT_BUS_CAPACITY)),
        clock: Arc::new(SystemClock),
        config: Arc::new(config.reconciler.clone()),
        profiles: profiles.clone(),
    };

    let runtime = ControllerRuntime::new(ctx);
    runtime
        .start()
        .await
        .context("failed to start controllers")?;

    for schedule in config.schedules.iter().cloned() {
        let key = schedule.key.clone();
        match store.admit_schedule(schedule).await {
            Ok(_) => info!(schedule = %key, "seed schedule admitted"),
            Err(ScanError::AlreadyExists(_)) => {
                debug!(schedule = %key, "seed schedule already present")
            }
            Err(err) => {
                return Err(err).context(format!("failed to admit seed schedule {key}"));
            }
        }
    }

    let state = AppState {
        store: store.clone(),
        runner,
        metrics,
        profiles,
        cluster: Arc::new(cluster),
    };
    let app = create_app(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on {}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error");

    info!("Server stopped accepting connections, stopping controllers");
    runtime.shutdown().await.context("controller shutdown failed")?;
    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, starting graceful shutdown"),
        () = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }
}
