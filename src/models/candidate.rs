use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{ItemId, ModelKind, UserId};

/// A scored item produced for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub item_id: ItemId,
    pub score: f64,
    pub model: ModelKind,
    /// Per-model contributions, only present on ensemble candidates
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub model_scores: BTreeMap<ModelKind, f64>,
}

impl Candidate {
    pub fn new(item_id: ItemId, score: f64, model: ModelKind) -> Self {
        Self {
            item_id,
            score,
            model,
            model_scores: BTreeMap::new(),
        }
    }
}

/// A single predicted rating, clamped to the rating scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub predicted_rating: f64,
    pub model: ModelKind,
}
