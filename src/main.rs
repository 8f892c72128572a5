//! Network Guard Inference Server
//!
//! Classifies network-flow samples and pushes live detections to dashboards.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    NETWORK GUARD SERVE                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  ┌───────────────┐  ┌─────────────────────┐ │
//! │  │  API      │  │  Dispatcher   │  │  Stream Ticker      │ │
//! │  │  Gateway  │─►│  (bounded     │◄─│  (synthetic flows)  │ │
//! │  │  (Axum)   │  │   scoring)    │  │                     │ │
//! │  └─────┬─────┘  └───────┬───────┘  └──────────┬──────────┘ │
//! │        │                ▼                     ▼            │
//! │        │         ┌─────────────┐      ┌─────────────┐      │
//! │        │         │  Backend    │      │ Multiplexer │──► WS │
//! │        │         └─────────────┘      └─────────────┘      │
//! │        └──► Upstream proxy                                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod engine;
mod models;
mod handlers;
mod upstream;
mod error;

use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::Context;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::{
    cors::{CorsLayer, Any},
    trace::TraceLayer,
    compression::CompressionLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use validator::Validate;

use config::{Config, LogFormat};
use engine::{
    BackendKind, Dispatcher, HeuristicBackend, Multiplexer, Normalizer, ScoringBackend,
    SyntheticBackend, SyntheticFlowSource,
};
use upstream::UpstreamClient;

pub use error::{AppError, AppResult};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    // Initialize logging
    init_tracing(config.log_format);

    config.validate().context("invalid configuration")?;

    tracing::info!("Network Guard server starting ({})...", config.environment);

    // Build application state
    let state = AppState::from_config(config)?;
    tracing::info!(
        "Model {} ready: {} scoring slots, batches up to {} samples",
        state.dispatcher.model_id(),
        state.dispatcher.capacity(),
        state.normalizer.max_batch_size(),
    );
    match &state.upstream {
        Some(client) => tracing::info!("Proxy upstream: {}", client.predict_url()),
        None => tracing::info!("Proxy upstream not configured"),
    }

    // Start detection stream ticker
    let flows = SyntheticFlowSource::new(state.dispatcher.clone(), state.config.synthetic_seed);
    let ticker = state.multiplexer.spawn(flows);

    // Build router
    let app = create_router(state.clone());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    tracing::info!("🚀 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await
        .context("server error")?;

    if let Err(e) = ticker.await {
        tracing::warn!("Stream ticker ended abnormally: {}", e);
    }
    tracing::info!("Server stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "netguard_serve=debug,tower_http=debug".into());

    match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

/// Resolves on Ctrl+C (or SIGTERM), after subscribers are closed and
/// in-flight scoring has drained.
async fn shutdown_signal(state: AppState) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown requested, closing streams and draining scoring");
    state.multiplexer.shutdown();
    state.dispatcher.shutdown(state.config.shutdown_grace()).await;
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub normalizer: Arc<Normalizer>,
    pub dispatcher: Arc<Dispatcher>,
    pub multiplexer: Arc<Multiplexer>,
    pub upstream: Option<Arc<UpstreamClient>>,
}

impl AppState {
    /// Wire the engine around a scoring backend. The stream ticker is not
    /// started here.
    pub fn new(config: Config, backend: Arc<dyn ScoringBackend>) -> anyhow::Result<Self> {
        let upstream = match config.upstream() {
            Some((base, token)) => {
                let client = UpstreamClient::new(base, token, config.upstream_timeout())
                    .context("failed to create upstream client")?;
                Some(Arc::new(client))
            }
            None => None,
        };

        Ok(Self {
            normalizer: Arc::new(Normalizer::new(config.feature_schema(), config.max_batch_size)),
            dispatcher: Arc::new(Dispatcher::new(backend, config.dispatcher_config())),
            multiplexer: Multiplexer::new(config.multiplexer_config()),
            upstream,
            config: Arc::new(config),
        })
    }

    /// Build state with the backend selected by `SCORING_BACKEND`
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let backend: Arc<dyn ScoringBackend> = match config.scoring_backend {
            BackendKind::Heuristic => Arc::new(HeuristicBackend::new(config.model_id.clone())),
            BackendKind::Synthetic => {
                Arc::new(SyntheticBackend::new(config.model_id.clone(), config.synthetic_seed))
            }
        };
        Self::new(config, backend)
    }
}

/// Create the main router with all routes
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.config.body_limit();

    Router::new()
        .route("/health", get(handlers::health::check))
        .route("/api/v1/predict", post(handlers::predict::predict))
        .route("/ws/stream", get(handlers::stream::stream))
        .route("/proxy/predict", post(handlers::proxy::predict))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}
