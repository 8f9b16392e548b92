use rayon::prelude::*;
use std::sync::Arc;

use super::Scorer;
use crate::{
    error::RecResult,
    models::{ItemId, ModelKind, UserId},
    services::matrix::{DatasetSplit, RatingMatrix},
};

/// Truncation and filtering knobs for neighbor averaging
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborParams {
    /// Most-similar entities considered before the similarity floor
    pub neighbor_count: usize,
    /// Neighbors kept for the weighted average
    pub top_k: usize,
    /// Neighbors at or below this similarity are discarded
    pub similarity_floor: f64,
    /// Unrated items evaluated per request
    pub candidate_item_limit: usize,
}

impl Default for NeighborParams {
    fn default() -> Self {
        Self {
            neighbor_count: 20,
            top_k: 10,
            similarity_floor: 0.1,
            candidate_item_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Items,
    Users,
}

/// Symmetric pairwise cosine similarity, dense
#[derive(Debug, Clone)]
pub struct SimilarityMatrix {
    size: usize,
    values: Vec<f64>,
}

impl SimilarityMatrix {
    /// Computes cosine similarity between entities described by sparse
    /// `(feature, value)` lists. Rows are filled in parallel.
    fn from_sparse(entities: &[Vec<(usize, f64)>], n_features: usize) -> Self {
        let size = entities.len();
        let mut by_feature: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n_features];
        for (entity, features) in entities.iter().enumerate() {
            for &(feature, value) in features {
                by_feature[feature].push((entity, value));
            }
        }
        let norms: Vec<f64> = entities
            .iter()
            .map(|features| features.iter().map(|(_, v)| v * v).sum::<f64>().sqrt())
            .collect();

        let mut values = vec![0.0; size * size];
        values
            .par_chunks_mut(size.max(1))
            .enumerate()
            .for_each(|(a, row)| {
                if norms[a] == 0.0 {
                    return;
                }
                for &(feature, value_a) in &entities[a] {
                    for &(b, value_b) in &by_feature[feature] {
                        row[b] += value_a * value_b;
                    }
                }
                for (b, cell) in row.iter_mut().enumerate() {
                    *cell = if norms[b] == 0.0 {
                        0.0
                    } else {
                        *cell / (norms[a] * norms[b])
                    };
                }
            });

        Self { size, values }
    }

    pub fn get(&self, a: usize, b: usize) -> f64 {
        self.values[a * self.size + b]
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// Neighbor-averaging scorer over items or users
pub struct NeighborScorer {
    axis: Axis,
    data: Arc<DatasetSplit>,
    similarity: SimilarityMatrix,
    params: NeighborParams,
}

impl NeighborScorer {
    /// Item-based: similarity between train-matrix columns
    pub fn fit_item_based(data: Arc<DatasetSplit>, params: NeighborParams) -> Self {
        let train = &data.train;
        let mut columns: Vec<Vec<(usize, f64)>> = vec![Vec::new(); train.n_items()];
        for (row, col, value) in train.observed() {
            columns[col].push((row, value));
        }
        let similarity = SimilarityMatrix::from_sparse(&columns, train.n_users());
        tracing::info!(items = similarity.size(), "Fitted item-based neighbor model");
        Self {
            axis: Axis::Items,
            data,
            similarity,
            params,
        }
    }

    /// User-based: similarity between train-matrix rows
    pub fn fit_user_based(data: Arc<DatasetSplit>, params: NeighborParams) -> Self {
        let train = &data.train;
        let rows: Vec<Vec<(usize, f64)>> = (0..train.n_users())
            .map(|row| train.rated_items(row).collect())
            .collect();
        let similarity = SimilarityMatrix::from_sparse(&rows, train.n_items());
        tracing::info!(users = similarity.size(), "Fitted user-based neighbor model");
        Self {
            axis: Axis::Users,
            data,
            similarity,
            params,
        }
    }

    /// Similarity between two items (item-based) or two users (user-based)
    pub fn similarity(&self, a: i64, b: i64) -> RecResult<f64> {
        let full = &self.data.full;
        let (a, b) = match self.axis {
            Axis::Items => (full.item_col(a)?, full.item_col(b)?),
            Axis::Users => (full.user_row(a)?, full.user_row(b)?),
        };
        Ok(self.similarity.get(a, b))
    }

    /// Weighted average of the top-k `(similarity, rating)` pairs, which must
    /// already be sorted by descending similarity and above the floor
    fn weighted_average(&self, neighbors: impl Iterator<Item = (f64, f64)>) -> Option<f64> {
        let (numerator, denominator) = neighbors
            .take(self.params.top_k)
            .fold((0.0, 0.0), |(num, den), (sim, rating)| {
                (num + sim * rating, den + sim)
            });
        (denominator > 0.0).then(|| numerator / denominator)
    }

    /// Item-based prediction from the user's own ratings of similar items
    fn predict_from_items(&self, row: usize, target: usize) -> Option<f64> {
        let train = &self.data.train;
        let mut rated: Vec<(usize, f64, f64)> = train
            .rated_items(row)
            .filter(|(col, _)| *col != target)
            .map(|(col, rating)| (col, self.similarity.get(target, col), rating))
            .collect();
        rated.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        rated.truncate(self.params.neighbor_count);

        let floor = self.params.similarity_floor;
        self.weighted_average(
            rated
                .into_iter()
                .filter(|(_, sim, _)| *sim > floor)
                .map(|(_, sim, rating)| (sim, rating)),
        )
    }

    /// Most similar other users above the floor, best first
    fn similar_users(&self, row: usize) -> Vec<(usize, f64)> {
        let train = &self.data.train;
        let mut others: Vec<(usize, f64)> = (0..train.n_users())
            .filter(|other| *other != row)
            .map(|other| (other, self.similarity.get(row, other)))
            .collect();
        others.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        others.truncate(self.params.neighbor_count);
        others.retain(|(_, sim)| *sim > self.params.similarity_floor);
        others
    }

    /// User-based prediction from neighbors who rated the target item
    fn predict_from_users(&self, neighbors: &[(usize, f64)], target: usize) -> Option<f64> {
        let train = &self.data.train;
        self.weighted_average(neighbors.iter().filter_map(|&(other, sim)| {
            let rating = train.get(other, target);
            (rating > 0.0).then_some((sim, rating))
        }))
    }

    fn candidate_items<'a>(&self, full: &'a RatingMatrix, row: usize) -> impl Iterator<Item = usize> + 'a {
        full.unrated_items(row).take(self.params.candidate_item_limit)
    }
}

impl Scorer for NeighborScorer {
    fn kind(&self) -> ModelKind {
        match self.axis {
            Axis::Items => ModelKind::ItemKnn,
            Axis::Users => ModelKind::UserKnn,
        }
    }

    fn score_items(&self, user_id: UserId) -> RecResult<Vec<(ItemId, f64)>> {
        let full = &self.data.full;
        let row = full.user_row(user_id)?;

        let scores = match self.axis {
            Axis::Items => self
                .candidate_items(full, row)
                .filter_map(|col| {
                    self.predict_from_items(row, col)
                        .map(|score| (full.item_id(col), score))
                })
                .collect(),
            Axis::Users => {
                let neighbors = self.similar_users(row);
                self.candidate_items(full, row)
                    .filter_map(|col| {
                        self.predict_from_users(&neighbors, col)
                            .map(|score| (full.item_id(col), score))
                    })
                    .collect()
            }
        };
        Ok(scores)
    }

    fn predict(&self, user_id: UserId, item_id: ItemId) -> RecResult<f64> {
        let full = &self.data.full;
        let row = full.user_row(user_id)?;
        let col = full.item_col(item_id)?;
        let predicted = match self.axis {
            Axis::Items => self.predict_from_items(row, col),
            Axis::Users => self.predict_from_users(&self.similar_users(row), col),
        };
        Ok(predicted.unwrap_or(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecError;
    use crate::services::matrix::{
        build,
        tests::{rating, small_ratings},
    };

    fn small_split() -> Arc<DatasetSplit> {
        Arc::new(build(&small_ratings(), 0.0, 42).unwrap())
    }

    #[test]
    fn test_item_similarity_uses_item_columns() {
        let scorer = NeighborScorer::fit_item_based(small_split(), NeighborParams::default());
        // C = (0, 3, 4), A = (5, 4, 0), B = (1, 5, 2) over users 1..3
        let sim_ca = scorer.similarity(30, 10).unwrap();
        let sim_cb = scorer.similarity(30, 20).unwrap();
        assert!((sim_ca - 12.0 / (5.0 * 41f64.sqrt())).abs() < 1e-9);
        assert!((sim_cb - 23.0 / (5.0 * 30f64.sqrt())).abs() < 1e-9);
        assert!((scorer.similarity(10, 10).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_item_based_prediction_weighted_average() {
        let scorer = NeighborScorer::fit_item_based(small_split(), NeighborParams::default());
        let sim_ca = 12.0 / (5.0 * 41f64.sqrt());
        let sim_cb = 23.0 / (5.0 * 30f64.sqrt());
        let expected = (sim_ca * 5.0 + sim_cb * 1.0) / (sim_ca + sim_cb);

        let scores = scorer.score_items(1).unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].0, 30);
        assert!((scores[0].1 - expected).abs() < 1e-9);
        assert!((scorer.predict(1, 30).unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_similarity_floor_excludes_weak_neighbors() {
        let params = NeighborParams {
            similarity_floor: 0.5,
            ..NeighborParams::default()
        };
        let scorer = NeighborScorer::fit_item_based(small_split(), params);
        // Only B (sim ≈ 0.84) survives for item C; A (≈ 0.37) is dropped.
        let scores = scorer.score_items(1).unwrap();
        assert!((scores[0].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_qualifying_neighbor_yields_no_candidate() {
        // Item 3 shares no rater with anything user 1 rated.
        let ratings = vec![rating(1, 1, 4.0), rating(2, 1, 5.0), rating(3, 3, 2.0)];
        let data = Arc::new(build(&ratings, 0.0, 42).unwrap());
        let scorer = NeighborScorer::fit_item_based(data, NeighborParams::default());
        assert!(scorer.score_items(1).unwrap().is_empty());
        assert_eq!(scorer.predict(1, 3).unwrap(), 0.0);
    }

    #[test]
    fn test_user_based_prediction() {
        let scorer = NeighborScorer::fit_user_based(small_split(), NeighborParams::default());
        // u1 = (5, 1, 0), u2 = (4, 5, 3), u3 = (0, 2, 4)
        let sim_12 = 25.0 / (26f64.sqrt() * 50f64.sqrt());
        let sim_13 = 2.0 / (26f64.sqrt() * 20f64.sqrt());
        assert!(sim_13 < 0.1);
        assert!((scorer.similarity(1, 2).unwrap() - sim_12).abs() < 1e-9);

        // Only user 2 qualifies, so the prediction is user 2's rating.
        let scores = scorer.score_items(1).unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].0, 30);
        assert!((scores[0].1 - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_candidate_item_limit() {
        let params = NeighborParams {
            candidate_item_limit: 0,
            ..NeighborParams::default()
        };
        let scorer = NeighborScorer::fit_user_based(small_split(), params);
        assert!(scorer.score_items(1).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_user() {
        let scorer = NeighborScorer::fit_user_based(small_split(), NeighborParams::default());
        assert_eq!(
            scorer.score_items(404).unwrap_err(),
            RecError::UnknownUser { user_id: 404 }
        );
        let scorer = NeighborScorer::fit_item_based(small_split(), NeighborParams::default());
        assert_eq!(
            scorer.predict(404, 10).unwrap_err(),
            RecError::UnknownUser { user_id: 404 }
        );
    }
}
