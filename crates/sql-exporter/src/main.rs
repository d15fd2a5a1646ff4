//! sql-exporter - Prometheus exporter for SQL query results.
//!
//! Runs the jobs of a YAML configuration file, each on its own thread, and
//! serves the collected gauges over HTTP.

mod handlers;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use axum::Router;
use axum::routing::get;
use clap::Parser;
use prometheus::Registry;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use sql_exporter_core::pg::PgConnector;
use sql_exporter_core::{Config, Connector, Job};

use handlers::{AppState, SharedState};

/// Prometheus exporter for SQL query results.
#[derive(Parser)]
#[command(name = "sql-exporter", version = sql_exporter_core::VERSION)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "sql-exporter.yml", env = "SQL_EXPORTER_CONFIG")]
    config: PathBuf,

    /// Listen address of the HTTP server.
    #[arg(long, default_value = "0.0.0.0:9237", env = "SQL_EXPORTER_LISTEN")]
    listen: String,

    /// Increase verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["sql_exporter", "sql_exporter_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %args.config.display(), error = %e, "failed to load config");
            process::exit(1);
        }
    };
    info!(
        version = sql_exporter_core::VERSION,
        path = %args.config.display(),
        jobs = config.jobs.len(),
        "sql-exporter starting"
    );

    let registry = Registry::new();
    let connector: Arc<dyn Connector> = Arc::new(PgConnector);
    let running = Arc::new(AtomicBool::new(true));

    let mut workers = Vec::with_capacity(config.jobs.len());
    for job_config in &config.jobs {
        let job = match Job::from_config(job_config, Arc::clone(&connector), registry.clone()) {
            Ok(job) => job,
            Err(e) => {
                error!(job = %job_config.name, error = %e, "invalid job");
                process::exit(1);
            }
        };
        let running = Arc::clone(&running);
        let spawned = thread::Builder::new()
            .name(format!("job-{}", job_config.name))
            .spawn(move || job.run(&running));
        match spawned {
            Ok(handle) => workers.push(handle),
            Err(e) => {
                error!(job = %job_config.name, error = %e, "failed to spawn job thread");
                process::exit(1);
            }
        }
    }

    let state: SharedState = Arc::new(AppState {
        registry,
        jobs: config.jobs.iter().map(|j| j.name.clone()).collect(),
    });

    let served = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime.block_on(serve(&args.listen, state)),
        Err(e) => Err(e),
    };

    running.store(false, Ordering::SeqCst);
    for worker in workers {
        if worker.join().is_err() {
            error!("job thread panicked");
        }
    }

    if let Err(e) = served {
        error!(listen = %args.listen, error = %e, "server error");
        process::exit(1);
    }
    info!("sql-exporter stopped");
}

async fn serve(listen: &str, state: SharedState) -> std::io::Result<()> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let app = Router::new()
        .route("/", get(handlers::handle_index))
        .route("/metrics", get(handlers::handle_metrics))
        .route("/healthz", get(handlers::handle_health))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, stopping");
}
