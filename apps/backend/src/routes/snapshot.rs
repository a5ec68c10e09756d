//! Snapshot endpoints

use axum::{extract::State, Json};

use crate::models::SnapshotSummary;
use crate::AppState;

/// GET /api/snapshot
pub async fn active(State(state): State<AppState>) -> Json<SnapshotSummary> {
    let snapshot = state.snapshots.current();
    Json(SnapshotSummary {
        version: snapshot.version(),
        fingerprint: snapshot.fingerprint().to_string(),
        items: snapshot.len(),
        calibrated_through: snapshot.calibrated_through(),
        reliability: snapshot.reliability().clone(),
    })
}
