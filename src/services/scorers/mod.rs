//! Scoring models
//!
//! Every model is fitted once from a [`DatasetSplit`](super::matrix::DatasetSplit)
//! snapshot and is read-only afterwards, so a fitted scorer can be shared across
//! worker threads without locking.
use std::cmp::Ordering;

use crate::{
    error::RecResult,
    models::{Candidate, ItemId, ModelKind, UserId},
};

pub mod content;
pub mod latent;
pub mod neighbor;

pub use content::ContentScorer;
pub use latent::LatentFactorScorer;
pub use neighbor::{NeighborParams, NeighborScorer};

/// Trait for fitted scoring models
///
/// `score_items` yields raw, unsorted scores for the user's candidate items;
/// ranking is shared by every model through the default `recommend`.
pub trait Scorer: Send + Sync {
    /// Model tag attached to produced candidates
    fn kind(&self) -> ModelKind;

    /// Scores every item the model considers a candidate for the user
    fn score_items(&self, user_id: UserId) -> RecResult<Vec<(ItemId, f64)>>;

    /// Raw (unclamped) prediction for a single pair
    fn predict(&self, user_id: UserId, item_id: ItemId) -> RecResult<f64>;

    /// Top `n` candidates, best first
    fn recommend(&self, user_id: UserId, n: usize) -> RecResult<Vec<Candidate>> {
        let kind = self.kind();
        let ranked = rank_scores(self.score_items(user_id)?, n);
        Ok(ranked
            .into_iter()
            .map(|(item_id, score)| Candidate::new(item_id, score, kind))
            .collect())
    }
}

/// Sorts by score descending with ties on ascending item id, then truncates.
/// Non-finite scores are dropped.
pub fn rank_scores(mut scores: Vec<(ItemId, f64)>, n: usize) -> Vec<(ItemId, f64)> {
    scores.retain(|(_, score)| score.is_finite());
    scores.sort_by(|a, b| compare_ranked(a.1, a.0, b.1, b.0));
    scores.truncate(n);
    scores
}

/// Ordering used by every ranked list: higher score first, then lower item id
pub fn compare_ranked(score_a: f64, item_a: ItemId, score_b: f64, item_b: ItemId) -> Ordering {
    score_b
        .partial_cmp(&score_a)
        .unwrap_or(Ordering::Equal)
        .then(item_a.cmp(&item_b))
}

/// Cosine similarity of two dense vectors, 0 when either is all zeros
pub fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_scores_orders_and_breaks_ties_by_item() {
        let ranked = rank_scores(vec![(3, 4.0), (1, 4.0), (2, 5.0), (4, 1.0)], 3);
        assert_eq!(ranked, vec![(2, 5.0), (1, 4.0), (3, 4.0)]);
    }

    #[test]
    fn test_rank_scores_drops_nan() {
        let ranked = rank_scores(vec![(1, f64::NAN), (2, 1.0)], 10);
        assert_eq!(ranked, vec![(2, 1.0)]);
    }

    #[test]
    fn test_cosine() {
        assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-12);
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
