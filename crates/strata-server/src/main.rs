//! Strata - resource cache interception proxy

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use strata_api::{AppState, MetricsHandle, create_router};
use strata_core::{
    ControlChannel, EvictionPolicy, NotificationRelay, Registration, Worker, WorkerOptions,
};
use strata_origin::{HttpOrigin, HttpOriginConfig, Origin};
use strata_storage::{MemoryStore, SqliteStore, StoreHandle};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use url::Url;

mod config;

use config::{Config, StorageBackend, StorageConfig};

const METRICS_UPKEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Strata - caching interception proxy
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Bind address
    #[arg(long, env = "STRATA_BIND")]
    bind: Option<String>,

    /// Port
    #[arg(short, long, env = "STRATA_PORT")]
    port: Option<u16>,

    /// Origin URL
    #[arg(long, env = "STRATA_ORIGIN")]
    origin: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    if let Some(origin) = args.origin {
        config.origin.url = origin;
    }

    init_logging(&config.logging.level, &config.logging.format);

    info!("Starting Strata v{}", env!("CARGO_PKG_VERSION"));

    let metrics_handle = if config.metrics.enabled {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("Failed to install Prometheus recorder")?;
        let upkeep = handle.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(METRICS_UPKEEP_INTERVAL);
            loop {
                interval.tick().await;
                upkeep.run_upkeep();
            }
        });
        Some(Arc::new(MetricsHandle::new(handle)))
    } else {
        None
    };

    let origin_url = Url::parse(&config.origin.url)
        .with_context(|| format!("Invalid origin URL: {}", config.origin.url))?;
    let eviction_policy: EvictionPolicy = config
        .cache
        .eviction_policy
        .parse()
        .context("Invalid eviction policy")?;
    let rules = config.rules.iter().map(|rule| rule.to_rule()).collect();

    let store = open_store(&config.storage).await?;

    let origin: Arc<dyn Origin> = Arc::new(HttpOrigin::new(HttpOriginConfig {
        user_agent: config.origin.user_agent.clone(),
        skip_tls_verify: config.origin.skip_tls_verify,
        timeout: config.origin.timeout_secs.map(Duration::from_secs),
    })?);

    let registration = Registration::new(
        config.app.prefix.clone(),
        origin_url.clone(),
        store.clone(),
        NotificationRelay::default(),
    );

    let worker = Worker::new(
        WorkerOptions {
            app_prefix: config.app.prefix.clone(),
            version: config.app.version.clone(),
            origin: origin_url,
            rules,
            default_partition: config.cache.default_partition.clone(),
            precache: config.cache.precache.clone(),
            eviction_policy,
        },
        store,
        origin,
    );
    registration
        .install(Arc::new(worker))
        .await
        .with_context(|| format!("Failed to install version {}", config.app.version))?;

    let (control, dispatcher) = ControlChannel::spawn(registration.clone());

    let state = AppState::new(registration, control);
    let app = create_router(state, metrics_handle).layer(TraceLayer::new_for_http());

    let bind_addr = args.bind.unwrap_or(config.server.bind_address);
    let port = args.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", bind_addr, port).parse()?;

    info!("Listening on {}", addr);
    info!("Origin: {}", config.origin.url);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    dispatcher.abort();
    info!("Server stopped");
    Ok(())
}

/// Open the configured partition store
async fn open_store(config: &StorageConfig) -> Result<StoreHandle> {
    let store: StoreHandle = match config.backend()? {
        StorageBackend::Sqlite => {
            if let Some(parent) = std::path::Path::new(&config.path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let url = format!("sqlite:{}?mode=rwc", config.path);
            Arc::new(
                SqliteStore::connect(&url, config.quota_bytes)
                    .await
                    .with_context(|| format!("Failed to open {}", config.path))?,
            )
        }
        StorageBackend::Memory => match config.quota_bytes {
            Some(quota) => Arc::new(MemoryStore::with_quota(quota)),
            None => Arc::new(MemoryStore::new()),
        },
    };
    info!("Using {} partition store", config.backend);
    Ok(store)
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Shutdown signal received");
}
