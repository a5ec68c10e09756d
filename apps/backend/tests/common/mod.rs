//! Common test utilities and fixtures for integration tests.
//!
//! Every test builds its own in-memory state from the fixture item bank, so
//! tests need no external services and never share an event log.

#![allow(dead_code)]

pub mod fixtures;

use axum::Router;
use axum_test::TestServer;

use adaptive_core::EngineConfig;
use adaptive_engine_backend::services::bootstrap::Bootstrap;
use adaptive_engine_backend::{router, AppState};

/// Test context holding the application state and its router.
pub struct TestContext {
    pub state: AppState,
    app: Router,
}

impl TestContext {
    /// Context over the fixture bank with the default engine configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_bank(config, fixtures::sample_bank())
    }

    pub fn with_bank(config: EngineConfig, bank: Bootstrap) -> Self {
        let (catalog, snapshot) = bank.into_parts().expect("fixture bank is valid");
        let state = AppState::new(config, catalog, snapshot).expect("fixture config is valid");
        let app = router(state.clone());
        Self { state, app }
    }

    /// Get the router for use with axum-test.
    pub fn router(&self) -> Router {
        self.app.clone()
    }

    pub fn server(&self) -> TestServer {
        TestServer::new(self.router()).expect("test server starts")
    }

    /// Number of records in the event log.
    pub async fn event_count(&self) -> usize {
        self.state.events.read().await.len()
    }
}
