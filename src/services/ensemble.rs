use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    str::FromStr,
};

use super::scorers::{compare_ranked, Scorer};
use crate::{
    error::{RecError, RecResult},
    models::{Candidate, ItemId, ModelKind, UserId},
};

/// Per-model weights; the keys are also the ensemble's members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleWeights(BTreeMap<ModelKind, f64>);

impl Default for EnsembleWeights {
    /// The three cheapest models; neighbor models are left out for latency
    fn default() -> Self {
        Self(BTreeMap::from([
            (ModelKind::Svd, 0.4),
            (ModelKind::Nmf, 0.3),
            (ModelKind::Content, 0.3),
        ]))
    }
}

impl EnsembleWeights {
    pub fn new(weights: BTreeMap<ModelKind, f64>) -> Self {
        Self(weights)
    }

    pub fn get(&self, kind: ModelKind) -> f64 {
        self.0.get(&kind).copied().unwrap_or(0.0)
    }

    /// Members with a positive weight
    pub fn members(&self) -> impl Iterator<Item = ModelKind> + '_ {
        self.0
            .iter()
            .filter(|(_, weight)| **weight > 0.0)
            .map(|(kind, _)| *kind)
    }
}

impl FromStr for EnsembleWeights {
    type Err = String;

    /// Parses `svd=0.4,nmf=0.3,content=0.3`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut weights = BTreeMap::new();
        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, weight) = pair
                .split_once('=')
                .ok_or_else(|| format!("expected model=weight, got '{}'", pair))?;
            let kind: ModelKind = name.parse().map_err(|e: RecError| e.to_string())?;
            if kind == ModelKind::Ensemble {
                return Err("the ensemble cannot be its own member".to_string());
            }
            let weight: f64 = weight
                .trim()
                .parse()
                .map_err(|_| format!("invalid weight '{}' for {}", weight.trim(), kind))?;
            if !weight.is_finite() || weight < 0.0 {
                return Err(format!("weight for {} must be non-negative", kind));
            }
            weights.insert(kind, weight);
        }
        if weights.is_empty() {
            return Err("at least one ensemble weight is required".to_string());
        }
        Ok(Self(weights))
    }
}

/// Asks every member for `2n` candidates and blends them.
///
/// A failing member is logged and left out; only when all of them fail does
/// the ensemble fail.
pub fn recommend(
    members: &[(ModelKind, RecResult<&dyn Scorer>)],
    weights: &EnsembleWeights,
    user_id: UserId,
    n: usize,
) -> RecResult<Vec<Candidate>> {
    let mut per_model = Vec::with_capacity(members.len());

    for (kind, scorer) in members {
        let result = scorer
            .as_ref()
            .map_err(|e| e.clone())
            .and_then(|scorer| scorer.recommend(user_id, n.saturating_mul(2)));
        match result {
            Ok(candidates) => per_model.push((*kind, candidates)),
            Err(e) => {
                tracing::warn!(user_id, model = %kind, error = %e, "Ensemble member failed");
            }
        }
    }

    if per_model.is_empty() {
        return Err(RecError::NoScorersAvailable { user_id });
    }

    tracing::debug!(
        user_id,
        contributing = per_model.len(),
        requested = members.len(),
        "Blending ensemble candidates"
    );

    Ok(aggregate(per_model, weights, n))
}

/// Weighted average per item over the models that scored it.
///
/// Sorted by score descending, ties on ascending item id, truncated to `n`.
pub fn aggregate(
    per_model: Vec<(ModelKind, Vec<Candidate>)>,
    weights: &EnsembleWeights,
    n: usize,
) -> Vec<Candidate> {
    let mut merged: HashMap<ItemId, BTreeMap<ModelKind, f64>> = HashMap::new();
    for (kind, candidates) in per_model {
        for candidate in candidates {
            merged
                .entry(candidate.item_id)
                .or_default()
                .insert(kind, candidate.score);
        }
    }

    let mut blended: Vec<Candidate> = merged
        .into_iter()
        .filter_map(|(item_id, model_scores)| {
            let (weighted, total_weight) = model_scores.iter().fold(
                (0.0, 0.0),
                |(weighted, total), (kind, score)| {
                    let weight = weights.get(*kind);
                    (weighted + weight * score, total + weight)
                },
            );
            (total_weight > 0.0).then(|| Candidate {
                item_id,
                score: weighted / total_weight,
                model: ModelKind::Ensemble,
                model_scores,
            })
        })
        .collect();

    blended.sort_by(|a, b| compare_ranked(a.score, a.item_id, b.score, b.item_id));
    blended.truncate(n);
    blended
}

/// Weighted average of single-pair predictions from the members that succeed
pub fn predict(
    members: &[(ModelKind, RecResult<&dyn Scorer>)],
    weights: &EnsembleWeights,
    user_id: UserId,
    item_id: ItemId,
) -> RecResult<f64> {
    let (weighted, total_weight) = members
        .iter()
        .filter_map(|(kind, scorer)| {
            let scorer = scorer.as_ref().ok()?;
            match scorer.predict(user_id, item_id) {
                Ok(value) => Some((weights.get(*kind), value)),
                Err(e) => {
                    tracing::warn!(user_id, item_id, model = %kind, error = %e, "Ensemble member failed");
                    None
                }
            }
        })
        .fold((0.0, 0.0), |(weighted, total), (weight, value)| {
            (weighted + weight * value, total + weight)
        });

    if total_weight > 0.0 {
        Ok(weighted / total_weight)
    } else {
        Err(RecError::NoScorersAvailable { user_id })
    }
}
