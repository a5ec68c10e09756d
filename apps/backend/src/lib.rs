pub mod error;
pub mod models;
pub mod routes;
pub mod services;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use adaptive_core::{EngineConfig, EventLog, ItemCatalog, ItemId, ParameterSnapshot, SnapshotStore, ValidationError};
use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::services::bootstrap;
use crate::services::engine::Engine;
use crate::services::refit::RefitControl;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub catalog: Arc<ItemCatalog>,
    pub snapshots: Arc<SnapshotStore>,
    pub events: Arc<RwLock<EventLog>>,
    /// Times each item was served to any learner.
    pub shown: Arc<RwLock<BTreeMap<ItemId, u64>>>,
    pub refit: Arc<RefitControl>,
}

impl AppState {
    pub fn new(
        config: EngineConfig,
        catalog: ItemCatalog,
        snapshot: ParameterSnapshot,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            engine: Arc::new(Engine::new(config)?),
            catalog: Arc::new(catalog),
            snapshots: Arc::new(SnapshotStore::new(snapshot)),
            events: Arc::new(RwLock::new(EventLog::new())),
            shown: Arc::new(RwLock::new(BTreeMap::new())),
            refit: Arc::new(RefitControl::new()),
        })
    }
}

/// Build the full router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/snapshot", get(routes::snapshot::active))
        .route("/api/events", post(routes::events::ingest))
        // Training lane
        .route("/api/ability/update", post(routes::ability::update))
        .route("/api/ability/replay", post(routes::ability::replay))
        .route("/api/ability/lane", post(routes::ability::lane))
        .route("/api/select", post(routes::select::select))
        // Topic allocation
        .route("/api/topics/plan", post(routes::topics::plan))
        .route("/api/topics/select", post(routes::topics::select))
        .route("/api/topics/observe", post(routes::topics::observe))
        .route("/api/topics/reset", post(routes::topics::reset))
        // Retention lane
        .route("/api/review/schedule", post(routes::review::schedule))
        .route("/api/review/plan", post(routes::review::plan))
        .route("/api/review/seed", post(routes::review::seed))
        // Forms and calibration
        .route("/api/forms/build", post(routes::forms::build))
        .route("/api/refit", post(routes::refit::start))
        .route("/api/refit/abort", post(routes::refit::abort))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var_os("ENGINE_CONFIG").map(PathBuf::from);
    let config = bootstrap::load_config(config_path.as_deref())?;

    let bank_path = std::env::var_os("ENGINE_BOOTSTRAP").map(PathBuf::from);
    let (catalog, snapshot) = bootstrap::load_bootstrap(bank_path.as_deref())?.into_parts()?;
    tracing::info!(
        items = catalog.len(),
        snapshot = snapshot.version(),
        fingerprint = snapshot.fingerprint(),
        "item bank loaded"
    );

    let state = AppState::new(config, catalog, snapshot)?;
    let app = router(state);

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("{}:{}", host, port);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}
