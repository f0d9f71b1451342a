use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crudsync::app::{router, AppState};
use crudsync::config::AppConfig;
use crudsync::database::{DatabaseManager, PgUserStore};

#[tokio::main]
async fn main() {
    // Load .env if present so cargo run picks up DATABASE_URL and PORT
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = serve().await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn serve() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    info!("Starting crudsync in {:?} mode", config.environment);

    let manager = DatabaseManager::connect(&config.database).await?;
    let state = AppState::new(Arc::new(PgUserStore::new(manager.pool().clone())));
    let app = router(state, &config);

    let bind_addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {}: {}", bind_addr, e))?;
    info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
