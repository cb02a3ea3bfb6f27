use anyhow::Context;
use outbox::{Dispatcher, OutboxStore, PgOutboxStore};
use outbox_relay::{bus::connect_bus, config::Config, db::init_pool, health};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    tracing::info!("Starting outbox relay...");

    let config = Config::from_env().map_err(anyhow::Error::msg)?;

    tracing::info!(
        bus_type = ?config.bus_type,
        topic = %config.topic,
        batch_size = config.batch_size,
        max_in_flight = config.max_in_flight,
        "Configuration loaded"
    );

    tracing::info!("Connecting to database...");
    let pool = init_pool(&config.database_url, &config.pool)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Running migrations...");
    outbox::run_migrations(&pool)
        .await
        .context("Failed to run outbox migrations")?;

    let bus = connect_bus(&config).await?;
    let store: Arc<dyn OutboxStore> = Arc::new(PgOutboxStore::new(pool.clone()));
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), bus, config.dispatcher_config()));

    let token = CancellationToken::new();
    let worker = tokio::spawn({
        let dispatcher = dispatcher.clone();
        let token = token.clone();
        async move { dispatcher.run(token).await }
    });

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Outbox relay health endpoint listening on {}", addr);

    let server = tokio::spawn({
        let token = token.clone();
        async move {
            axum::serve(listener, health::router(store))
                .with_graceful_shutdown(token.cancelled_owned())
                .await
        }
    });

    shutdown_signal().await;

    // In-flight publishes finish within their timeout; anything abandoned is
    // reclaimed by the next relay to start.
    token.cancel();
    worker.await.context("Dispatcher task failed")?;
    server
        .await
        .context("Health server task failed")?
        .context("Health server failed")?;
    pool.close().await;

    tracing::info!("Outbox relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
