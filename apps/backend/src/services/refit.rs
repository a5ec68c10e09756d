//! Running the refit job off the request path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{ApiError, Result};
use crate::models::RefitResponse;
use crate::AppState;

/// At most one refit at a time, plus its abort flag.
#[derive(Debug, Default)]
pub struct RefitControl {
    running: AtomicBool,
    abort: Arc<AtomicBool>,
}

/// Clears the running flag when the run ends, however it ends.
struct RunGuard<'a>(&'a RefitControl);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
    }
}

impl RefitControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask a running refit to stop after its current iteration. Returns
    /// whether a run was in progress.
    pub fn request_abort(&self) -> bool {
        let running = self.is_running();
        if running {
            self.abort.store(true, Ordering::SeqCst);
        }
        running
    }

    fn try_start(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        self.abort.store(false, Ordering::SeqCst);
        Some(RunGuard(self))
    }
}

/// Fit a new snapshot from the current effective attempts and publish it.
pub async fn run(state: &AppState, seed: u64) -> Result<RefitResponse> {
    let _guard = state
        .refit
        .try_start()
        .ok_or_else(|| ApiError::Conflict("a refit is already running".to_string()))?;

    let attempts = state.events.read().await.effective_attempts();
    let previous = state.snapshots.current();
    let job = state.engine.refit.clone();
    let abort = state.refit.abort.clone();
    let base = previous.clone();

    tracing::info!(attempts = attempts.len(), previous = previous.version(), seed, "starting refit");
    let outcome = tokio::task::spawn_blocking(move || job.run_refit(&attempts, &base, seed, &*abort))
        .await
        .map_err(|e| ApiError::Internal(format!("refit task failed: {}", e)))??;

    let version = outcome.snapshot.version();
    let fingerprint = outcome.snapshot.fingerprint().to_string();
    state.snapshots.publish(outcome.snapshot)?;

    Ok(RefitResponse {
        previous_version: previous.version(),
        version,
        fingerprint,
        diagnostics: outcome.diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use adaptive_core::{EngineConfig, ItemCatalog, ParameterSnapshot};

    fn empty_state() -> AppState {
        AppState::new(EngineConfig::default(), ItemCatalog::default(), ParameterSnapshot::empty()).unwrap()
    }

    #[test]
    fn test_second_start_is_refused() {
        let control = RefitControl::new();
        let guard = control.try_start();
        assert!(guard.is_some());
        assert!(control.try_start().is_none());
        drop(guard);
        assert!(!control.is_running());
        assert!(control.try_start().is_some());
    }

    #[test]
    fn test_abort_only_applies_to_running_refit() {
        let control = RefitControl::new();
        assert!(!control.request_abort());
        assert!(!control.abort.load(Ordering::SeqCst));

        let _guard = control.try_start();
        assert!(control.request_abort());
        assert!(control.abort.load(Ordering::SeqCst));
    }

    #[test]
    fn test_start_clears_stale_abort() {
        let control = RefitControl::new();
        control.abort.store(true, Ordering::SeqCst);
        let _guard = control.try_start();
        assert!(!control.abort.load(Ordering::SeqCst));
    }

    #[test]
    fn test_run_refused_while_another_run_is_active() {
        let state = empty_state();
        let _guard = state.refit.try_start();
        let result = tokio_test::block_on(run(&state, 0));
        assert!(matches!(result, Err(ApiError::Conflict(_))));
    }

    #[test]
    fn test_run_publishes_and_releases() {
        let state = empty_state();
        let response = tokio_test::block_on(run(&state, 0)).unwrap();
        assert_eq!(response.previous_version, 0);
        assert_eq!(response.version, 1);
        assert_eq!(state.snapshots.version(), 1);
        assert!(!state.refit.is_running());
    }
}
