//! Event ingestion endpoints

use adaptive_core::event::{self, AppendOutcome};
use axum::{extract::rejection::JsonRejection, extract::State, Json};

use crate::error::Result;
use crate::models::{IngestEventsRequest, IngestEventsResponse};
use crate::AppState;

/// POST /api/events
///
/// The batch is decoded and validated in full before anything is appended.
pub async fn ingest(
    State(state): State<AppState>,
    payload: std::result::Result<Json<IngestEventsRequest>, JsonRejection>,
) -> Result<Json<IngestEventsResponse>> {
    let Json(payload) = payload?;
    let records = payload
        .records
        .into_iter()
        .map(event::decode_value)
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut log = state.events.write().await;
    let mut appended = 0;
    let mut duplicates = 0;
    for record in records {
        match log.append(record)? {
            AppendOutcome::Appended => appended += 1,
            AppendOutcome::Duplicate => duplicates += 1,
        }
    }
    tracing::debug!(appended, duplicates, total = log.len(), "events ingested");

    Ok(Json(IngestEventsResponse {
        appended,
        duplicates,
        total: log.len(),
    }))
}
