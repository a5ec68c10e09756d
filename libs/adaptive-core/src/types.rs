//! Core types for the scheduling engine.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

pub type ItemId = String;
pub type LearnerId = String;
pub type ObjectiveId = String;
pub type DomainId = String;

/// Rating for a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Again,
    Hard,
    Good,
    Easy,
}

impl Rating {
    /// Convert to 4-point numeric value (1-4).
    pub fn to_value(self) -> u8 {
        match self {
            Self::Again => 1,
            Self::Hard => 2,
            Self::Good => 3,
            Self::Easy => 4,
        }
    }

    /// Create from 4-point numeric value.
    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Again),
            2 => Some(Self::Hard),
            3 => Some(Self::Good),
            4 => Some(Self::Easy),
            _ => None,
        }
    }

    /// Map 2-point rating to 4-point.
    /// Wrong (1) -> Again, Correct (2) -> Good
    pub fn from_2point(correct: bool) -> Self {
        if correct {
            Self::Good
        } else {
            Self::Again
        }
    }

    pub fn is_lapse(self) -> bool {
        self == Self::Again
    }
}

/// A scored response to an item: the category index, 0 = lowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub category: u8,
}

impl Response {
    pub fn new(category: u8) -> Self {
        Self { category }
    }

    pub fn correct() -> Self {
        Self { category: 1 }
    }

    pub fn incorrect() -> Self {
        Self { category: 0 }
    }

    pub fn from_correct(correct: bool) -> Self {
        if correct {
            Self::correct()
        } else {
            Self::incorrect()
        }
    }
}

/// Item response model with its location parameters.
///
/// GPCM step locations are `difficulty + thresholds[v]`; the thresholds are
/// ordered and there is one per category boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum ItemModel {
    Rasch { difficulty: f64 },
    Gpcm { difficulty: f64, thresholds: Vec<f64> },
}

/// Calibrated parameters of one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemParameters {
    #[serde(flatten)]
    pub model: ItemModel,
    #[serde(default = "default_discrimination")]
    pub discrimination: f64,
}

fn default_discrimination() -> f64 {
    1.0
}

impl ItemParameters {
    pub fn rasch(difficulty: f64) -> Self {
        Self {
            model: ItemModel::Rasch { difficulty },
            discrimination: 1.0,
        }
    }

    pub fn gpcm(difficulty: f64, thresholds: Vec<f64>, discrimination: f64) -> Self {
        Self {
            model: ItemModel::Gpcm {
                difficulty,
                thresholds,
            },
            discrimination,
        }
    }

    /// Number of response categories.
    pub fn categories(&self) -> usize {
        match &self.model {
            ItemModel::Rasch { .. } => 2,
            ItemModel::Gpcm { thresholds, .. } => thresholds.len() + 1,
        }
    }

    pub fn difficulty(&self) -> f64 {
        match &self.model {
            ItemModel::Rasch { difficulty } | ItemModel::Gpcm { difficulty, .. } => *difficulty,
        }
    }

    /// Absolute step locations, one per category boundary.
    pub fn steps(&self) -> Vec<f64> {
        match &self.model {
            ItemModel::Rasch { difficulty } => vec![*difficulty],
            ItemModel::Gpcm {
                difficulty,
                thresholds,
            } => thresholds.iter().map(|d| difficulty + d).collect(),
        }
    }

    /// Rebuild parameters of the same model family from absolute steps.
    pub(crate) fn with_steps(&self, steps: &[f64]) -> Self {
        let model = match &self.model {
            ItemModel::Rasch { .. } => ItemModel::Rasch {
                difficulty: steps.first().copied().unwrap_or(0.0),
            },
            ItemModel::Gpcm { .. } => {
                let difficulty = steps.iter().sum::<f64>() / steps.len().max(1) as f64;
                ItemModel::Gpcm {
                    difficulty,
                    thresholds: steps.iter().map(|s| s - difficulty).collect(),
                }
            }
        };
        Self {
            model,
            discrimination: self.discrimination,
        }
    }

    pub fn validate(&self, item_id: &str) -> Result<(), ValidationError> {
        if !self.discrimination.is_finite() || self.discrimination <= 0.0 {
            return Err(ValidationError::InvalidDiscrimination {
                item_id: item_id.to_string(),
                value: self.discrimination,
            });
        }
        let difficulty = self.difficulty();
        if !difficulty.is_finite() {
            return Err(ValidationError::InvalidDifficulty {
                item_id: item_id.to_string(),
                value: difficulty,
            });
        }
        if let ItemModel::Gpcm { thresholds, .. } = &self.model {
            if thresholds.is_empty() {
                return Err(ValidationError::TooFewCategories {
                    item_id: item_id.to_string(),
                    categories: 1,
                });
            }
            let ordered = thresholds.windows(2).all(|w| w[0] <= w[1]);
            if !ordered || thresholds.iter().any(|t| !t.is_finite()) {
                return Err(ValidationError::MalformedThresholds {
                    item_id: item_id.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn check_response(&self, item_id: &str, response: Response) -> Result<(), ValidationError> {
        let categories = self.categories();
        if (response.category as usize) >= categories {
            return Err(ValidationError::ResponseOutOfRange {
                item_id: item_id.to_string(),
                category: response.category,
                categories,
            });
        }
        Ok(())
    }
}

/// An item as seen by the online path: catalog tags joined with the
/// parameters of the active snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub objectives: Vec<ObjectiveId>,
    pub domain: DomainId,
    pub params: ItemParameters,
}

/// Exposure counters for one item (or objective) and one learner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExposureRecord {
    pub shown_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_shown_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl ExposureRecord {
    pub fn on_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.map_or(false, |until| until > now)
    }

    /// Hours since the last showing, `None` if never shown.
    pub fn hours_since_shown(&self, now: DateTime<Utc>) -> Option<f64> {
        self.last_shown_at
            .map(|at| (now.signed_duration_since(at).num_seconds() as f64 / 3600.0).max(0.0))
    }

    pub fn record_shown(&self, now: DateTime<Utc>, cooldown: Duration) -> Self {
        Self {
            shown_count: self.shown_count.saturating_add(1),
            last_shown_at: Some(now),
            cooldown_until: if cooldown > Duration::zero() {
                Some(now + cooldown)
            } else {
                None
            },
        }
    }
}

/// A learner's exposure history. Owned by the caller and carried from one
/// session to the next; nothing in it resets when a session ends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExposureState {
    #[serde(default)]
    pub items: BTreeMap<ItemId, ExposureRecord>,
    #[serde(default)]
    pub objectives: BTreeMap<ObjectiveId, ExposureRecord>,
}

impl ExposureState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item(&self, item_id: &str) -> ExposureRecord {
        self.items.get(item_id).cloned().unwrap_or_default()
    }

    /// Exposure after `item` was shown at `now`; only the item itself gets
    /// a cooldown.
    pub fn record_item(&self, item: &Item, now: DateTime<Utc>, cooldown: Duration) -> Self {
        let mut next = self.clone();
        let exposure = next.items.entry(item.id.clone()).or_default();
        *exposure = exposure.record_shown(now, cooldown);
        for objective in &item.objectives {
            let exposure = next.objectives.entry(objective.clone()).or_default();
            *exposure = exposure.record_shown(now, Duration::zero());
        }
        next
    }
}

/// Per-session context consumed by the item selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub items_answered: u32,
    #[serde(default)]
    pub domain_counts: BTreeMap<DomainId, u32>,
    /// Target share per blueprint domain for this session; empty disables
    /// the blueprint term.
    #[serde(default)]
    pub domain_weights: BTreeMap<DomainId, f64>,
}

impl SessionState {
    pub fn new(session_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            started_at,
            items_answered: 0,
            domain_counts: BTreeMap::new(),
            domain_weights: BTreeMap::new(),
        }
    }

    pub fn with_domain_weights(mut self, weights: BTreeMap<DomainId, f64>) -> Self {
        self.domain_weights = weights;
        self
    }

    /// Session state after `item` was presented and answered.
    pub fn record_item(&self, item: &Item) -> Self {
        let mut next = self.clone();
        next.items_answered = next.items_answered.saturating_add(1);
        *next.domain_counts.entry(item.domain.clone()).or_insert(0) += 1;
        next
    }
}
