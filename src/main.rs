//! Chatbot gateway - main application entry point.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool and run migrations
//! 3. Start the background queue for log appends and usage increments
//! 4. Build the HTTP router and serve until Ctrl-C
//! 5. Cancel in-flight authentications, then drain the background queue

use std::{net::SocketAddr, sync::Arc};

use chatbot_gateway::{
    background,
    clock::{Clock, SystemClock},
    config::Config,
    db,
    gateway::Gateway,
    hasher, routes,
    state::AppState,
    store::{KeyStore, LogStore, PgKeyStore, PgLogStore},
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber.
    // Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let keys: Arc<dyn KeyStore> = Arc::new(PgKeyStore::new(pool.clone()));
    let logs: Arc<dyn LogStore> = Arc::new(PgLogStore::new(pool.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let (queue, worker) =
        background::spawn(config.background_queue_depth, keys.clone(), logs.clone());
    tracing::info!(depth = config.background_queue_depth, "Background queue started");

    let admin_token_hash: Option<Arc<str>> = match config.admin_token.as_deref() {
        Some(token) => match hasher::hash_key(token.as_bytes()) {
            Ok(hashed) => Some(Arc::from(hashed.key_hash)),
            Err(err) => anyhow::bail!("ADMIN_TOKEN is unusable: {err}"),
        },
        None => {
            tracing::info!("ADMIN_TOKEN not set, admin routes disabled");
            None
        }
    };

    let shutdown = CancellationToken::new();
    let state = AppState {
        gateway: Gateway::new(keys.clone(), logs, clock.clone(), queue, config.gateway()),
        keys,
        clock,
        issuance: config.issuance(),
        admin_token_hash,
        shutdown: shutdown.clone(),
        db: Some(pool),
    };
    let app = routes::router(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    // The router (and every queue handle in it) is gone, so the worker can finish
    worker.drain(config.shutdown_grace()).await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
    shutdown.cancel();
}
