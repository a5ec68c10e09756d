//! Versioned event records and the append-only event log.
//!
//! Records are the source of truth for both online replay and offline refits.
//! Version 1 attempts carried a boolean `correct`; decoding lifts them to the
//! current schema so consumers only ever see version 2.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::types::{ItemId, LearnerId, ObjectiveId, Response};

pub const CURRENT_SCHEMA_VERSION: u64 = 2;
pub const SUPPORTED_SCHEMA_VERSIONS: [u64; 2] = [1, 2];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Started,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    Started,
    Completed,
}

/// Payload of an event record, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventBody {
    Attempt {
        item_id: ItemId,
        #[serde(default)]
        objectives: Vec<ObjectiveId>,
        category: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<Uuid>,
    },
    Session {
        session_id: Uuid,
        phase: SessionPhase,
        #[serde(default)]
        items_answered: u32,
    },
    Lesson {
        lesson_id: String,
        objective: ObjectiveId,
        status: LessonStatus,
        #[serde(default)]
        minutes: f64,
    },
    /// Replaces the response category of an earlier attempt.
    Correction { supersedes: Uuid, category: u8 },
}

/// One immutable interaction record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub schema_version: u64,
    pub record_id: Uuid,
    pub learner_id: LearnerId,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub body: EventBody,
}

impl EventRecord {
    pub fn new(learner_id: impl Into<LearnerId>, occurred_at: DateTime<Utc>, body: EventBody) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            record_id: Uuid::new_v4(),
            learner_id: learner_id.into(),
            occurred_at,
            body,
        }
    }

    pub fn attempt(
        learner_id: impl Into<LearnerId>,
        item_id: impl Into<ItemId>,
        objectives: Vec<ObjectiveId>,
        response: Response,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            learner_id,
            occurred_at,
            EventBody::Attempt {
                item_id: item_id.into(),
                objectives,
                category: response.category,
                duration_ms: None,
                session_id: None,
            },
        )
    }

    pub fn kind(&self) -> &'static str {
        match self.body {
            EventBody::Attempt { .. } => "attempt",
            EventBody::Session { .. } => "session",
            EventBody::Lesson { .. } => "lesson",
            EventBody::Correction { .. } => "correction",
        }
    }

    /// Structural checks applied before a record is accepted anywhere.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !SUPPORTED_SCHEMA_VERSIONS.contains(&self.schema_version) {
            return Err(ValidationError::UnknownSchemaVersion {
                version: self.schema_version,
            });
        }
        if self.learner_id.trim().is_empty() {
            return Err(malformed(format!("record {} has no learner", self.record_id)));
        }
        match &self.body {
            EventBody::Attempt { item_id, .. } if item_id.trim().is_empty() => {
                Err(malformed(format!("attempt {} has no item", self.record_id)))
            }
            EventBody::Lesson { minutes, .. } if !minutes.is_finite() || *minutes < 0.0 => {
                Err(malformed(format!("lesson {} has invalid minutes", self.record_id)))
            }
            EventBody::Correction { supersedes, .. } if *supersedes == self.record_id => {
                Err(malformed(format!("correction {} supersedes itself", self.record_id)))
            }
            _ => Ok(()),
        }
    }
}

fn malformed(message: impl Into<String>) -> ValidationError {
    ValidationError::MalformedRecord(message.into())
}

/// Decode a raw JSON record, normalising older schema versions.
pub fn decode(raw: &str) -> Result<EventRecord, ValidationError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| malformed(e.to_string()))?;
    decode_value(value)
}

pub fn decode_value(mut value: Value) -> Result<EventRecord, ValidationError> {
    let version = value
        .get("schema_version")
        .and_then(Value::as_u64)
        .ok_or_else(|| malformed("missing schema_version"))?;
    match version {
        1 => upgrade_v1(&mut value)?,
        CURRENT_SCHEMA_VERSION => {}
        other => return Err(ValidationError::UnknownSchemaVersion { version: other }),
    }

    let record: EventRecord = serde_json::from_value(value).map_err(|e| malformed(e.to_string()))?;
    record.validate()?;
    Ok(record)
}

fn upgrade_v1(value: &mut Value) -> Result<(), ValidationError> {
    let object = value
        .as_object_mut()
        .ok_or_else(|| malformed("record is not an object"))?;
    match object.get("type").and_then(Value::as_str) {
        Some("attempt") if !object.contains_key("category") => {
            let correct = object
                .remove("correct")
                .and_then(|v| v.as_bool())
                .ok_or_else(|| malformed("version 1 attempt without `correct`"))?;
            object.insert("category".into(), Value::from(u8::from(correct)));
        }
        Some("correction") => {
            return Err(malformed("correction records require schema version 2"));
        }
        _ => {}
    }
    object.insert("schema_version".into(), Value::from(CURRENT_SCHEMA_VERSION));
    Ok(())
}

pub fn encode(record: &EventRecord) -> Result<String, ValidationError> {
    record.validate()?;
    serde_json::to_string(record).map_err(|e| malformed(e.to_string()))
}

/// An attempt with any corrections applied, flattened for consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptEvent {
    pub record_id: Uuid,
    pub learner_id: LearnerId,
    pub item_id: ItemId,
    pub objectives: Vec<ObjectiveId>,
    pub category: u8,
    pub occurred_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl AttemptEvent {
    pub fn response(&self) -> Response {
        Response::new(self.category)
    }
}

/// Effective attempts of `records`: duplicates dropped, the latest correction
/// per attempt applied, ordered by learner, time and record id. A correction
/// only applies to an attempt of its own learner.
pub fn effective_attempts<'a>(records: impl IntoIterator<Item = &'a EventRecord>) -> Vec<AttemptEvent> {
    let mut seen = HashSet::new();
    let mut attempts = Vec::new();
    let mut corrections: HashMap<(Uuid, LearnerId), (DateTime<Utc>, Uuid, u8)> = HashMap::new();

    for record in records {
        if !seen.insert(record.record_id) {
            continue;
        }
        match &record.body {
            EventBody::Attempt {
                item_id,
                objectives,
                category,
                duration_ms,
                ..
            } => attempts.push(AttemptEvent {
                record_id: record.record_id,
                learner_id: record.learner_id.clone(),
                item_id: item_id.clone(),
                objectives: objectives.clone(),
                category: *category,
                occurred_at: record.occurred_at,
                duration_ms: *duration_ms,
            }),
            EventBody::Correction {
                supersedes,
                category,
            } => {
                let candidate = (record.occurred_at, record.record_id, *category);
                let latest = corrections
                    .entry((*supersedes, record.learner_id.clone()))
                    .or_insert(candidate);
                if (candidate.0, candidate.1) > (latest.0, latest.1) {
                    *latest = candidate;
                }
            }
            _ => {}
        }
    }

    for attempt in &mut attempts {
        let key = (attempt.record_id, attempt.learner_id.clone());
        if let Some((_, _, category)) = corrections.get(&key) {
            attempt.category = *category;
        }
    }
    attempts.sort_by(|a, b| {
        (&a.learner_id, a.occurred_at, a.record_id).cmp(&(&b.learner_id, b.occurred_at, b.record_id))
    });
    attempts
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppendOutcome {
    Appended,
    Duplicate,
}

/// Append-only log partitioned by learner.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    records: Vec<EventRecord>,
    by_learner: BTreeMap<LearnerId, Vec<usize>>,
    ids: HashSet<Uuid>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a validated record. Re-appending a known record id is a no-op.
    pub fn append(&mut self, record: EventRecord) -> Result<AppendOutcome, ValidationError> {
        record.validate()?;
        if record.schema_version != CURRENT_SCHEMA_VERSION {
            return Err(malformed(format!(
                "record {} must be normalised to schema version {} before append",
                record.record_id, CURRENT_SCHEMA_VERSION
            )));
        }
        if !self.ids.insert(record.record_id) {
            tracing::debug!(record = %record.record_id, "duplicate event ignored");
            return Ok(AppendOutcome::Duplicate);
        }
        self.by_learner
            .entry(record.learner_id.clone())
            .or_default()
            .push(self.records.len());
        self.records.push(record);
        Ok(AppendOutcome::Appended)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn learners(&self) -> impl Iterator<Item = &LearnerId> {
        self.by_learner.keys()
    }

    pub fn for_learner<'a>(&'a self, learner_id: &str) -> impl Iterator<Item = &'a EventRecord> + 'a {
        self.by_learner
            .get(learner_id)
            .into_iter()
            .flatten()
            .map(move |&index| &self.records[index])
    }

    pub fn effective_attempts(&self) -> Vec<AttemptEvent> {
        effective_attempts(&self.records)
    }

    pub fn effective_attempts_for(&self, learner_id: &str) -> Vec<AttemptEvent> {
        effective_attempts(self.for_learner(learner_id))
    }
}
