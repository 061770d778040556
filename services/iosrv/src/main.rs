//! Digital I/O service entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use iosrv::api::{routes::create_router, AppState};
use iosrv::channels::ChannelService;
use iosrv::config::AppConfig;
use iosrv::connection::ConnectionManager;
use iosrv::notify::{BroadcastSink, NotificationSink, PublisherConfig, RedisSink};
use iosrv::protocol::ProtocolClient;
use iosrv::scheduler::PollingScheduler;
use iosrv::store::{DeviceStore, SqliteStore};
use iosrv::subscriptions::SubscriptionTracker;
use iosrv::{IoSrvError, Result};

/// Command-line arguments for iosrv
#[derive(Parser)]
#[command(
    name = "iosrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Modbus-TCP digital I/O service",
    long_about = None
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Configuration file path (TOML)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Bind address override, e.g. 0.0.0.0:6050
    #[arg(short = 'b', long)]
    bind_address: Option<String>,

    /// Validate configuration and exit without starting the service
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("iosrv={0},fleet_modbus={0}", args.log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(bind) = args.bind_address {
        config.server.bind_address = bind;
    }
    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }
    info!(
        bind = %config.server.bind_address,
        database = %config.database.url,
        "Starting iosrv v{}",
        env!("CARGO_PKG_VERSION")
    );

    let store: Arc<dyn DeviceStore> = Arc::new(SqliteStore::connect(&config.database.url).await?);

    let sink: Arc<dyn NotificationSink> = match &config.redis_url {
        Some(url) => {
            info!(redis = %url, "Publishing notifications to Redis");
            Arc::new(RedisSink::new(url, PublisherConfig::default())?)
        }
        None => {
            warn!("No Redis URL configured, notifications stay in-process");
            Arc::new(BroadcastSink::default())
        }
    };

    let connections = Arc::new(ConnectionManager::new());
    let protocol = ProtocolClient::new(connections.clone());
    let channels = Arc::new(ChannelService::new(store.clone(), protocol, sink.clone()));
    let tracker = Arc::new(SubscriptionTracker::new());

    let shutdown = CancellationToken::new();
    let scheduler = PollingScheduler::new(
        store.clone(),
        channels.clone(),
        tracker.clone(),
        sink,
        config.polling.clone(),
    );
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown.clone()));

    let state = AppState {
        channels,
        connections,
        tracker,
        defaults: config.device_defaults.clone(),
    };
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .map_err(|e| {
            IoSrvError::config(format!(
                "Failed to bind {}: {}",
                config.server.bind_address, e
            ))
        })?;
    info!("API listening on {}", config.server.bind_address);

    let serve_shutdown = shutdown.clone();
    let result = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                }
                _ = serve_shutdown.cancelled() => {}
            }
        })
        .await;

    shutdown.cancel();
    if let Err(e) = scheduler_handle.await {
        error!("Scheduler task failed: {}", e);
    }
    result.map_err(|e| IoSrvError::internal(format!("Server error: {}", e)))?;
    info!("iosrv stopped");
    Ok(())
}
