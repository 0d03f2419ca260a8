use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pollroom::{
    build_router,
    config::AppConfig,
    state::{
        history::{HistoryStore, JsonFileHistoryStore, MemoryHistoryStore},
        AppState,
    },
};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pollroom=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting pollroom...");

    let config = AppConfig::from_env();

    let history: Arc<dyn HistoryStore> = match &config.history_file {
        Some(path) => {
            let store = JsonFileHistoryStore::new(path);
            tracing::info!("Poll history is written to {}", store.path().display());
            Arc::new(store)
        }
        None => {
            tracing::warn!("POLLROOM_HISTORY_FILE not set, poll history is kept in memory only");
            Arc::new(MemoryHistoryStore::new())
        }
    };

    let addr = config.bind_addr;
    let state = Arc::new(AppState::with_config(config, history));
    let app = build_router(state.clone());

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!("Listening on http://{}", addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {}", e);
    }

    // Closed polls may still be on their way to the history store
    state.flush_history().await;
    tracing::info!("Shut down");
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown requested"),
        Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
    }
}
