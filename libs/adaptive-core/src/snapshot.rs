//! Versioned, immutable item-parameter snapshots and the atomic store that
//! publishes them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{EngineError, Result, ValidationError};
use crate::types::{ItemId, ItemParameters};

/// Aggregate calibration quality of a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReliabilitySummary {
    /// Mean of 1 - posterior variance / prior variance across learners.
    pub mean_variance_reduction: f64,
    pub mean_responses_per_item: f64,
    #[serde(default)]
    pub responses_per_item: BTreeMap<ItemId, u64>,
    pub items_shrunk: usize,
    pub items_fallback: usize,
    /// Test information averaged over the ability prior.
    pub test_information: f64,
}

#[derive(Deserialize)]
struct RawSnapshot {
    version: u64,
    items: BTreeMap<ItemId, ItemParameters>,
    #[serde(default)]
    reliability: ReliabilitySummary,
    #[serde(default)]
    calibrated_through: Option<DateTime<Utc>>,
    #[serde(default)]
    fingerprint: Option<String>,
}

/// Immutable bundle of calibrated item parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSnapshot")]
pub struct ParameterSnapshot {
    version: u64,
    items: BTreeMap<ItemId, ItemParameters>,
    reliability: ReliabilitySummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    calibrated_through: Option<DateTime<Utc>>,
    fingerprint: String,
}

impl TryFrom<RawSnapshot> for ParameterSnapshot {
    type Error = ValidationError;

    fn try_from(raw: RawSnapshot) -> std::result::Result<Self, Self::Error> {
        let snapshot = Self::new(raw.version, raw.items, raw.reliability, raw.calibrated_through)?;
        if let Some(expected) = raw.fingerprint {
            if expected != snapshot.fingerprint {
                return Err(ValidationError::MalformedRecord(format!(
                    "snapshot {} fingerprint mismatch",
                    raw.version
                )));
            }
        }
        Ok(snapshot)
    }
}

impl ParameterSnapshot {
    /// Build a snapshot, validating every item's parameters.
    pub fn new(
        version: u64,
        items: BTreeMap<ItemId, ItemParameters>,
        reliability: ReliabilitySummary,
        calibrated_through: Option<DateTime<Utc>>,
    ) -> std::result::Result<Self, ValidationError> {
        for (id, params) in &items {
            params.validate(id)?;
        }
        let fingerprint = fingerprint(&items)?;
        Ok(Self {
            version,
            items,
            reliability,
            calibrated_through,
            fingerprint,
        })
    }

    /// First published snapshot (version 1) from authored parameters.
    pub fn initial(
        items: impl IntoIterator<Item = (ItemId, ItemParameters)>,
    ) -> std::result::Result<Self, ValidationError> {
        Self::new(1, items.into_iter().collect(), ReliabilitySummary::default(), None)
    }

    /// Version 0: nothing calibrated yet.
    pub fn empty() -> Self {
        Self {
            version: 0,
            items: BTreeMap::new(),
            reliability: ReliabilitySummary::default(),
            calibrated_through: None,
            fingerprint: format!("{:x}", Sha256::digest(b"{}")),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn params(&self, item_id: &str) -> Option<&ItemParameters> {
        self.items.get(item_id)
    }

    pub fn items(&self) -> &BTreeMap<ItemId, ItemParameters> {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn reliability(&self) -> &ReliabilitySummary {
        &self.reliability
    }

    pub fn calibrated_through(&self) -> Option<DateTime<Utc>> {
        self.calibrated_through
    }

    /// SHA-256 of the canonical JSON of the item parameters.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

fn fingerprint(items: &BTreeMap<ItemId, ItemParameters>) -> std::result::Result<String, ValidationError> {
    let canonical =
        serde_json::to_string(items).map_err(|e| ValidationError::MalformedRecord(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// An online result was computed against a snapshot that has since been
/// superseded. Non-fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleSnapshotWarning {
    pub computed_against: u64,
    pub active: u64,
}

impl fmt::Display for StaleSnapshotWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "computed against snapshot {} but snapshot {} is active",
            self.computed_against, self.active
        )
    }
}

/// Holds the single active snapshot. Readers clone an `Arc` and never hold
/// the lock during computation; publishing swaps the pointer.
#[derive(Debug)]
pub struct SnapshotStore {
    active: RwLock<Arc<ParameterSnapshot>>,
}

impl SnapshotStore {
    pub fn new(initial: ParameterSnapshot) -> Self {
        Self {
            active: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn current(&self) -> Arc<ParameterSnapshot> {
        // The guarded value is a pointer; a poisoned lock still holds a whole snapshot.
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn version(&self) -> u64 {
        self.current().version()
    }

    /// Atomically make `next` active; returns the superseded snapshot.
    pub fn publish(&self, next: ParameterSnapshot) -> Result<Arc<ParameterSnapshot>> {
        let next = Arc::new(next);
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        if next.version() <= active.version() {
            return Err(EngineError::VersionConflict {
                active: active.version(),
                proposed: next.version(),
            });
        }
        let previous = std::mem::replace(&mut *active, next);
        drop(active);

        tracing::info!(
            previous = previous.version(),
            version = self.version(),
            "published parameter snapshot"
        );
        Ok(previous)
    }

    /// Warn when a result was computed against an older snapshot.
    pub fn check_stale(&self, computed_against: u64) -> Option<StaleSnapshotWarning> {
        let active = self.version();
        if computed_against < active {
            let warning = StaleSnapshotWarning {
                computed_against,
                active,
            };
            tracing::warn!(%warning, "stale snapshot");
            Some(warning)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn snapshot(version: u64, difficulty: f64) -> ParameterSnapshot {
        let items = (0..20)
            .map(|i| (format!("item-{:02}", i), ItemParameters::rasch(difficulty)))
            .collect();
        ParameterSnapshot::new(version, items, ReliabilitySummary::default(), None).unwrap()
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let items = [("bad".to_string(), ItemParameters::gpcm(0.0, vec![1.0, -1.0], 1.0))];
        assert!(ParameterSnapshot::initial(items).is_err());
    }

    #[test]
    fn fingerprint_tracks_content() {
        assert_eq!(snapshot(1, 0.0).fingerprint(), snapshot(2, 0.0).fingerprint());
        assert_ne!(snapshot(1, 0.0).fingerprint(), snapshot(1, 0.5).fingerprint());
        assert_eq!(snapshot(1, 0.0).fingerprint().len(), 64);
    }

    #[test]
    fn serde_round_trip_checks_fingerprint() {
        let original = snapshot(3, 0.25);
        let json = serde_json::to_string(&original).unwrap();
        let back: ParameterSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);

        let tampered = json.replace(original.fingerprint(), &"0".repeat(64));
        assert!(serde_json::from_str::<ParameterSnapshot>(&tampered).is_err());
    }

    #[test]
    fn publish_requires_newer_version() {
        let store = SnapshotStore::new(snapshot(2, 0.0));
        assert!(matches!(
            store.publish(snapshot(2, 1.0)),
            Err(EngineError::VersionConflict { active: 2, proposed: 2 })
        ));
        let previous = store.publish(snapshot(3, 1.0)).unwrap();
        assert_eq!(previous.version(), 2);
        assert_eq!(store.version(), 3);
    }

    #[test]
    fn stale_check_reports_older_versions() {
        let store = SnapshotStore::new(snapshot(5, 0.0));
        assert_eq!(store.check_stale(5), None);
        assert_eq!(
            store.check_stale(4),
            Some(StaleSnapshotWarning {
                computed_against: 4,
                active: 5
            })
        );
    }

    #[test]
    fn readers_never_observe_a_torn_snapshot() {
        let store = Arc::new(SnapshotStore::new(snapshot(1, 0.0)));
        let reader = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..2000 {
                    let current = store.current();
                    let expected = (current.version() - 1) as f64;
                    assert!(current.items().values().all(|p| p.difficulty() == expected));
                }
            })
        };
        for version in 2..=50 {
            store.publish(snapshot(version, (version - 1) as f64)).unwrap();
        }
        reader.join().unwrap();
        assert_eq!(store.version(), 50);
    }
}
