use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use purchase_gateway::aggregate::Aggregator;
use purchase_gateway::backend::BackendClient;
use purchase_gateway::cache::ResponseCache;
use purchase_gateway::config::{self, Config};
use purchase_gateway::handlers::{self, AppState};
use purchase_gateway::metrics::Metrics;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = load_config()?;

    // Initialize logging
    init_logging(&config.logging);

    info!(
        "Starting Purchase Gateway v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Initialize components
    let backend = Arc::new(BackendClient::new(&config.backend)?);
    let aggregator = Arc::new(Aggregator::new(backend));
    let cache = Arc::new(ResponseCache::new(&config.cache));
    let metrics = Arc::new(Metrics::new());

    let state = Arc::new(AppState {
        cache: cache.clone(),
        aggregator,
        metrics,
    });

    // Start background cache sweep task
    let cache_clone = cache.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            cache_clone.cleanup_expired();
        }
    });

    // Build router
    let app = build_router(state, config.request_timeout());

    // Start server
    let addr: SocketAddr = config.server_addr().parse()?;
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn load_config() -> anyhow::Result<Config> {
    // Try loading from config file first
    let config_path =
        std::env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "config/gateway.toml".to_string());

    if std::path::Path::new(&config_path).exists() {
        info!("Loading configuration from {}", config_path);
        Config::load(&config_path).map_err(|e| anyhow::anyhow!("{}", e))
    } else {
        info!("No config file found, using default configuration");
        Ok(Config::default())
    }
}

fn init_logging(config: &config::LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

fn build_router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    let internal_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/stats", get(handlers::cache_stats))
        .route("/purge", post(handlers::purge_cache));

    Router::new()
        .route(
            "/api/recent_purchases/{username}",
            get(handlers::recent_purchases),
        )
        .nest("/internal", internal_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(request_timeout))
                .layer(CompressionLayer::new()),
        )
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}
