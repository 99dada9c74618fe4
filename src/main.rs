use std::net::SocketAddr;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use snippetbox::{config::Config, routes, state::AppState};

const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("🛑 Shutdown signal received, draining connections"),
        Err(e) => tracing::error!("❌ Failed to listen for shutdown signal: {}", e),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    let state = AppState::new(&config).await?;
    tracing::info!("✅ AppState initialized");

    let app = match routes::app(state.clone()) {
        Ok(app) => app,
        Err(e) => {
            tracing::error!("❌ Invalid route table: {}", e);
            return Err(e.into());
        }
    };

    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SWEEP_INTERVAL).await;
            match sessions.sweep().await {
                Ok(removed) => tracing::info!("🧹 Removed {} expired sessions", removed),
                Err(e) => tracing::error!("❌ Session sweep failed: {}", e),
            }
        }
    });
    tracing::info!("✅ Background session sweeper started (runs every hour)");

    let addr = config.addr;
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🚀 Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("👋 Server stopped");
    Ok(())
}
