use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use super::{
    ensemble::{self, EnsembleWeights},
    matrix::{self, DatasetSplit},
    scorers::{ContentScorer, LatentFactorScorer, NeighborParams, NeighborScorer, Scorer},
};
use crate::{
    error::{RecError, RecResult},
    models::{Candidate, ItemId, ModelKind, Rating, UserId, MAX_RATING, MIN_RATING},
};

/// Fitting parameters for a model set
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub rank: usize,
    pub svd_iterations: usize,
    pub nmf_max_iter: usize,
    pub neighbors: NeighborParams,
    pub max_features: usize,
    pub ensemble_weights: EnsembleWeights,
    pub split_ratio: f64,
    pub seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rank: 50,
            svd_iterations: 30,
            nmf_max_iter: 200,
            neighbors: NeighborParams::default(),
            max_features: 100,
            ensemble_weights: EnsembleWeights::default(),
            split_ratio: 0.2,
            seed: 42,
        }
    }
}

/// Dataset dimensions and fitted flags
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub models: BTreeMap<ModelKind, bool>,
    pub n_users: usize,
    pub n_items: usize,
    pub n_ratings: usize,
    pub n_held_out: usize,
    pub fitted_at: DateTime<Utc>,
}

/// Hold-out accuracy of one model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub model: ModelKind,
    pub count: usize,
    pub mae: f64,
    pub rmse: f64,
}

/// Every model fitted from one rating snapshot.
///
/// Immutable once built. Retraining builds a new set and swaps it in whole.
pub struct ModelSet {
    data: Arc<DatasetSplit>,
    svd: LatentFactorScorer,
    nmf: LatentFactorScorer,
    item_knn: NeighborScorer,
    user_knn: NeighborScorer,
    content: Option<ContentScorer>,
    weights: EnsembleWeights,
    fitted_at: DateTime<Utc>,
}

impl ModelSet {
    /// Builds the matrices and fits all five models in parallel
    pub fn fit(
        ratings: &[Rating],
        item_tags: &HashMap<ItemId, Vec<String>>,
        config: &EngineConfig,
    ) -> RecResult<Self> {
        let data = Arc::new(matrix::build(ratings, config.split_ratio, config.seed)?);

        tracing::info!(
            users = data.full.n_users(),
            items = data.full.n_items(),
            ratings = data.full.n_observed(),
            held_out = data.test.len(),
            "Fitting model set"
        );

        let ((svd, nmf), ((item_knn, user_knn), content)) = rayon::join(
            || {
                rayon::join(
                    || {
                        LatentFactorScorer::fit_svd(
                            data.clone(),
                            config.rank,
                            config.svd_iterations,
                            config.seed,
                        )
                    },
                    || {
                        LatentFactorScorer::fit_nmf(
                            data.clone(),
                            config.rank,
                            config.nmf_max_iter,
                            config.seed,
                        )
                    },
                )
            },
            || {
                rayon::join(
                    || {
                        rayon::join(
                            || NeighborScorer::fit_item_based(data.clone(), config.neighbors),
                            || NeighborScorer::fit_user_based(data.clone(), config.neighbors),
                        )
                    },
                    || ContentScorer::fit(data.clone(), item_tags, config.max_features),
                )
            },
        );

        if content.is_none() {
            tracing::warn!("No catalogue tags overlap the rating data, content model not fitted");
        }

        Ok(Self {
            data,
            svd,
            nmf,
            item_knn,
            user_knn,
            content,
            weights: config.ensemble_weights.clone(),
            fitted_at: Utc::now(),
        })
    }

    pub fn data(&self) -> &DatasetSplit {
        &self.data
    }

    pub fn is_fitted(&self, kind: ModelKind) -> bool {
        match kind {
            ModelKind::Content => self.content.is_some(),
            ModelKind::Ensemble => self.weights.members().any(|k| self.scorer(k).is_ok()),
            _ => true,
        }
    }

    fn scorer(&self, kind: ModelKind) -> RecResult<&dyn Scorer> {
        match kind {
            ModelKind::Svd => Ok(&self.svd),
            ModelKind::Nmf => Ok(&self.nmf),
            ModelKind::ItemKnn => Ok(&self.item_knn),
            ModelKind::UserKnn => Ok(&self.user_knn),
            ModelKind::Content => self
                .content
                .as_ref()
                .map(|scorer| scorer as &dyn Scorer)
                .ok_or(RecError::ModelNotFitted { model: kind }),
            ModelKind::Ensemble => Err(RecError::ModelNotFitted { model: kind }),
        }
    }

    fn members(&self) -> Vec<(ModelKind, RecResult<&dyn Scorer>)> {
        self.weights
            .members()
            .map(|kind| (kind, self.scorer(kind)))
            .collect()
    }

    /// Top `n` candidates for the user from the chosen model
    pub fn recommend(&self, user_id: UserId, n: usize, kind: ModelKind) -> RecResult<Vec<Candidate>> {
        match kind {
            ModelKind::Ensemble => ensemble::recommend(&self.members(), &self.weights, user_id, n),
            _ => self.scorer(kind)?.recommend(user_id, n),
        }
    }

    /// Unclamped prediction
    fn predict_raw(&self, user_id: UserId, item_id: ItemId, kind: ModelKind) -> RecResult<f64> {
        match kind {
            ModelKind::Ensemble => {
                ensemble::predict(&self.members(), &self.weights, user_id, item_id)
            }
            _ => self.scorer(kind)?.predict(user_id, item_id),
        }
    }

    /// Prediction clamped to the rating scale
    pub fn predict(&self, user_id: UserId, item_id: ItemId, kind: ModelKind) -> RecResult<f64> {
        self.data.full.user_row(user_id)?;
        self.data.full.item_col(item_id)?;
        let raw = self.predict_raw(user_id, item_id, kind)?;
        Ok(raw.clamp(MIN_RATING, MAX_RATING))
    }

    pub fn status(&self) -> ModelStatus {
        ModelStatus {
            models: ModelKind::SCORERS
                .into_iter()
                .map(|kind| (kind, self.is_fitted(kind)))
                .collect(),
            n_users: self.data.full.n_users(),
            n_items: self.data.full.n_items(),
            n_ratings: self.data.full.n_observed(),
            n_held_out: self.data.test.len(),
            fitted_at: self.fitted_at,
        }
    }

    /// MAE and RMSE of raw predictions over the held-out ratings
    pub fn evaluate(&self, kind: ModelKind) -> RecResult<Evaluation> {
        if kind != ModelKind::Ensemble {
            self.scorer(kind)?;
        }

        let (count, abs_sum, sq_sum) = self
            .data
            .test
            .iter()
            .filter_map(|rating| {
                self.predict_raw(rating.user_id, rating.item_id, kind)
                    .ok()
                    .map(|predicted| predicted - rating.value)
            })
            .fold((0usize, 0.0, 0.0), |(count, abs_sum, sq_sum), err| {
                (count + 1, abs_sum + err.abs(), sq_sum + err * err)
            });

        let (mae, rmse) = if count == 0 {
            (0.0, 0.0)
        } else {
            (abs_sum / count as f64, (sq_sum / count as f64).sqrt())
        };

        Ok(Evaluation {
            model: kind,
            count,
            mae,
            rmse,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::matrix::tests::{rating, small_ratings};
    use proptest::prelude::*;

    fn small_config() -> EngineConfig {
        EngineConfig {
            rank: 2,
            svd_iterations: 20,
            nmf_max_iter: 50,
            split_ratio: 0.0,
            ..EngineConfig::default()
        }
    }

    fn genre_tags() -> HashMap<ItemId, Vec<String>> {
        HashMap::from([
            (10, vec!["Action".to_string()]),
            (20, vec!["Comedy".to_string()]),
            (30, vec!["Action".to_string(), "Thriller".to_string()]),
        ])
    }

    #[test]
    fn test_fit_reports_every_model() {
        let models = ModelSet::fit(&small_ratings(), &genre_tags(), &small_config()).unwrap();
        let status = models.status();
        assert!(status.models.values().all(|fitted| *fitted));
        assert_eq!(status.models.len(), 5);
        assert_eq!((status.n_users, status.n_items, status.n_ratings), (3, 3, 7));
    }

    #[test]
    fn test_fit_empty_dataset() {
        let err = ModelSet::fit(&[], &genre_tags(), &small_config()).err();
        assert_eq!(err, Some(RecError::EmptyDataset));
    }

    #[test]
    fn test_every_model_recommends_unrated_items() {
        let models = ModelSet::fit(&small_ratings(), &genre_tags(), &small_config()).unwrap();
        for kind in [ModelKind::Svd, ModelKind::Nmf, ModelKind::Content, ModelKind::Ensemble] {
            let recs = models.recommend(1, 5, kind).unwrap();
            assert_eq!(
                recs.iter().map(|c| c.item_id).collect::<Vec<_>>(),
                vec![30],
                "model {}",
                kind
            );
        }
    }

    #[test]
    fn test_content_without_tags_is_not_fitted() {
        let models = ModelSet::fit(&small_ratings(), &HashMap::new(), &small_config()).unwrap();
        assert!(!models.is_fitted(ModelKind::Content));
        assert_eq!(
            models.recommend(1, 5, ModelKind::Content).unwrap_err(),
            RecError::ModelNotFitted {
                model: ModelKind::Content
            }
        );
        let blended = models.recommend(1, 5, ModelKind::Ensemble).unwrap();
        assert_eq!(blended.len(), 1);
        assert!(!blended[0].model_scores.contains_key(&ModelKind::Content));
    }

    #[test]
    fn test_unknown_user_fails_every_model_and_ensemble() {
        let models = ModelSet::fit(&small_ratings(), &genre_tags(), &small_config()).unwrap();
        for kind in ModelKind::SCORERS {
            assert_eq!(
                models.recommend(99, 5, kind).unwrap_err(),
                RecError::UnknownUser { user_id: 99 }
            );
        }
        assert_eq!(
            models.recommend(99, 5, ModelKind::Ensemble).unwrap_err(),
            RecError::NoScorersAvailable { user_id: 99 }
        );
    }

    #[test]
    fn test_predict_validates_pair() {
        let models = ModelSet::fit(&small_ratings(), &genre_tags(), &small_config()).unwrap();
        assert_eq!(
            models.predict(99, 10, ModelKind::Svd).unwrap_err(),
            RecError::UnknownUser { user_id: 99 }
        );
        assert_eq!(
            models.predict(1, 99, ModelKind::Ensemble).unwrap_err(),
            RecError::UnknownItem { item_id: 99 }
        );
    }

    #[test]
    fn test_neighbor_without_support_clamps_to_floor() {
        let models = ModelSet::fit(&small_ratings(), &genre_tags(), &small_config()).unwrap();
        let config = EngineConfig {
            neighbors: NeighborParams {
                similarity_floor: 0.99,
                ..NeighborParams::default()
            },
            ..small_config()
        };
        let strict = ModelSet::fit(&small_ratings(), &genre_tags(), &config).unwrap();
        // no item rated by user 3 is that similar to item 10
        assert_eq!(strict.predict(3, 10, ModelKind::ItemKnn).unwrap(), MIN_RATING);
        assert!(models.predict(3, 10, ModelKind::ItemKnn).unwrap() >= MIN_RATING);
    }

    #[test]
    fn test_evaluate_counts_held_out_ratings() {
        let ratings: Vec<Rating> = (1..=6)
            .flat_map(|u| (1..=6).map(move |i| rating(u, i, ((u * i) % 5 + 1) as f64)))
            .collect();
        let config = EngineConfig {
            split_ratio: 0.25,
            ..small_config()
        };
        let models = ModelSet::fit(&ratings, &HashMap::new(), &config).unwrap();
        let evaluation = models.evaluate(ModelKind::Svd).unwrap();
        assert_eq!(evaluation.count, 9);
        assert!(evaluation.rmse >= evaluation.mae);
        assert_eq!(
            models.evaluate(ModelKind::Content).unwrap_err(),
            RecError::ModelNotFitted {
                model: ModelKind::Content
            }
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_predictions_are_clamped(
            cells in proptest::collection::vec((1i64..5, 1i64..6, 1u8..=5), 2..25),
        ) {
            let ratings: Vec<Rating> = cells
                .iter()
                .map(|(u, i, v)| rating(*u, *i, f64::from(*v)))
                .collect();
            let models = ModelSet::fit(&ratings, &HashMap::new(), &small_config()).unwrap();
            let full = &models.data().full;
            for user_id in full.user_ids() {
                for item_id in full.item_ids() {
                    for kind in [ModelKind::Svd, ModelKind::Nmf, ModelKind::ItemKnn, ModelKind::UserKnn, ModelKind::Ensemble] {
                        let value = models.predict(*user_id, *item_id, kind).unwrap();
                        prop_assert!((MIN_RATING..=MAX_RATING).contains(&value));
                    }
                }
            }
        }
    }
}
