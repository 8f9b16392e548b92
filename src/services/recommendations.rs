use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;

use super::engine::{EngineConfig, Evaluation, ModelSet, ModelStatus};
use crate::{
    db::{
        cache::{CacheStats, CacheSweeperHandle},
        CacheKey, InvalidationScope, MemoCache, RatingStore,
    },
    error::{AppError, AppResult, RecError, RecResult},
    memoized,
    models::{Candidate, Catalogue, ItemId, ModelKind, Prediction, Rating, UserId},
};

/// Runtime knobs of the service around the engine
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub engine: EngineConfig,
    pub cache_timeout: Duration,
    pub request_deadline: Option<Duration>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            cache_timeout: Duration::from_secs(300),
            request_deadline: None,
        }
    }
}

/// One model's entry in a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelOutcome {
    Success { recommendations: Vec<Candidate> },
    Error { message: String },
}

impl From<RecResult<Vec<Candidate>>> for ModelOutcome {
    fn from(result: RecResult<Vec<Candidate>>) -> Self {
        match result {
            Ok(recommendations) => ModelOutcome::Success { recommendations },
            Err(e) => ModelOutcome::Error {
                message: e.to_string(),
            },
        }
    }
}

/// Snapshot reported by the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub dataset: Option<ModelStatus>,
    pub cache: CacheStats,
}

/// Owns the fitted models, the memoization cache and the rating store.
///
/// Readers clone the current `Arc<ModelSet>` and score without holding the
/// lock; retraining swaps in a complete new set.
pub struct RecommendationService {
    models: RwLock<Option<Arc<ModelSet>>>,
    cache: MemoCache,
    store: Arc<dyn RatingStore>,
    catalogue: Arc<Catalogue>,
    engine: EngineConfig,
    request_deadline: Option<Duration>,
}

impl RecommendationService {
    pub fn new(
        store: Arc<dyn RatingStore>,
        catalogue: Arc<Catalogue>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            models: RwLock::new(None),
            cache: MemoCache::new(settings.cache_timeout),
            store,
            catalogue,
            engine: settings.engine,
            request_deadline: settings.request_deadline,
        }
    }

    pub fn cache(&self) -> &MemoCache {
        &self.cache
    }

    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    pub fn shared_catalogue(&self) -> Arc<Catalogue> {
        self.catalogue.clone()
    }

    pub fn store(&self) -> Arc<dyn RatingStore> {
        self.store.clone()
    }

    /// Starts the periodic eviction of entries older than `retention`
    pub fn spawn_cache_sweeper(&self, interval: Duration, retention: Duration) -> CacheSweeperHandle {
        self.cache.spawn_sweeper(interval, retention)
    }

    async fn current_models(&self) -> Option<Arc<ModelSet>> {
        self.models.read().await.clone()
    }

    async fn fitted(&self, kind: ModelKind) -> RecResult<Arc<ModelSet>> {
        self.current_models()
            .await
            .ok_or(RecError::ModelNotFitted { model: kind })
    }

    /// Runs CPU-bound scoring on the blocking pool, bounded by the request deadline
    async fn run_scoring<T, F>(&self, operation: &str, compute: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> RecResult<T> + Send + 'static,
    {
        let task = tokio::task::spawn_blocking(compute);
        let joined = match self.request_deadline {
            Some(deadline) => tokio::time::timeout(deadline, task).await.map_err(|_| {
                tracing::warn!(
                    operation,
                    deadline_ms = deadline.as_millis() as u64,
                    "Scoring deadline exceeded"
                );
                RecError::Timeout {
                    operation: operation.to_string(),
                }
            })?,
            None => task.await,
        };

        let result =
            joined.map_err(|e| AppError::Internal(format!("Scoring task failed: {}", e)))?;
        Ok(result?)
    }

    /// Top `n` items for the user from the named model, memoized
    #[tracing::instrument(skip(self))]
    pub async fn get_recommendations(
        &self,
        user_id: UserId,
        n: usize,
        model: &str,
    ) -> AppResult<Vec<Candidate>> {
        let kind: ModelKind = model.parse()?;
        memoized!(
            self.cache,
            CacheKey::Recommendations {
                user_id,
                n,
                model: kind
            },
            self.compute_recommendations(user_id, n, kind)
        )
    }

    async fn compute_recommendations(
        &self,
        user_id: UserId,
        n: usize,
        kind: ModelKind,
    ) -> AppResult<Vec<Candidate>> {
        let models = self.fitted(kind).await?;
        let candidates = self
            .run_scoring("recommendations", move || models.recommend(user_id, n, kind))
            .await?;
        tracing::info!(user_id, model = %kind, count = candidates.len(), "Generated recommendations");
        Ok(candidates)
    }

    /// Rating prediction for one pair, clamped to [1, 5], memoized
    #[tracing::instrument(skip(self))]
    pub async fn predict_rating(
        &self,
        user_id: UserId,
        item_id: ItemId,
        model: &str,
    ) -> AppResult<Prediction> {
        let kind: ModelKind = model.parse()?;
        memoized!(
            self.cache,
            CacheKey::Prediction {
                user_id,
                item_id,
                model: kind
            },
            self.compute_prediction(user_id, item_id, kind)
        )
    }

    async fn compute_prediction(
        &self,
        user_id: UserId,
        item_id: ItemId,
        kind: ModelKind,
    ) -> AppResult<Prediction> {
        let models = self.fitted(kind).await?;
        let predicted_rating = self
            .run_scoring("prediction", move || models.predict(user_id, item_id, kind))
            .await?;
        Ok(Prediction {
            user_id,
            item_id,
            predicted_rating,
            model: kind,
        })
    }

    /// Every model's list for the user, failures reported per model
    #[tracing::instrument(skip(self))]
    pub async fn compare_models(
        &self,
        user_id: UserId,
        n: usize,
    ) -> AppResult<BTreeMap<ModelKind, ModelOutcome>> {
        memoized!(
            self.cache,
            CacheKey::Comparison { user_id, n },
            self.compute_comparison(user_id, n)
        )
    }

    async fn compute_comparison(
        &self,
        user_id: UserId,
        n: usize,
    ) -> AppResult<BTreeMap<ModelKind, ModelOutcome>> {
        let models = self.current_models().await;
        self.run_scoring("comparison", move || {
            Ok(ModelKind::ALL
                .into_iter()
                .map(|kind| {
                    let result = match &models {
                        Some(models) => models.recommend(user_id, n, kind),
                        None => Err(RecError::ModelNotFitted { model: kind }),
                    };
                    (kind, ModelOutcome::from(result))
                })
                .collect())
        })
        .await
    }

    /// Drops cached results in scope, returning how many were removed
    pub fn invalidate_cache(&self, scope: InvalidationScope) -> usize {
        self.cache.invalidate(scope)
    }

    /// Fits a new model set from the snapshot and publishes it atomically.
    ///
    /// The previous set keeps serving until the swap; the cache is cleared
    /// afterwards.
    #[tracing::instrument(skip(self, ratings), fields(ratings = ratings.len()))]
    pub async fn retrain(&self, ratings: Vec<Rating>) -> AppResult<ModelStatus> {
        let item_tags = self.catalogue.tag_sets();
        let engine = self.engine.clone();
        let models = tokio::task::spawn_blocking(move || {
            ModelSet::fit(&ratings, &item_tags, &engine)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Training task failed: {}", e)))??;

        for kind in [ModelKind::Svd, ModelKind::Nmf] {
            if let Ok(evaluation) = models.evaluate(kind) {
                tracing::info!(
                    model = %kind,
                    count = evaluation.count,
                    mae = evaluation.mae,
                    rmse = evaluation.rmse,
                    "Hold-out evaluation"
                );
            }
        }

        let status = models.status();
        *self.models.write().await = Some(Arc::new(models));
        let cleared = self.cache.invalidate(InvalidationScope::All);

        tracing::info!(
            users = status.n_users,
            items = status.n_items,
            ratings = status.n_ratings,
            cleared,
            "Model set published"
        );
        Ok(status)
    }

    /// Refits from the full snapshot in the rating store
    pub async fn reload(&self) -> AppResult<ModelStatus> {
        let ratings = self.store.all_ratings().await?;
        self.retrain(ratings).await
    }

    /// Stores a rating and drops the user's cached results before returning.
    ///
    /// Fitted models only see the rating after the next retrain.
    #[tracing::instrument(skip(self))]
    pub async fn rate_item(&self, user_id: UserId, item_id: ItemId, value: f64) -> AppResult<Rating> {
        let rating = Rating::new(user_id, item_id, value, Utc::now())?;
        self.store.upsert_rating(&rating).await?;
        let removed = self.cache.invalidate(InvalidationScope::User(user_id));
        tracing::info!(user_id, item_id, value, removed, "Rating stored");
        Ok(rating)
    }

    pub async fn user_ratings(&self, user_id: UserId) -> AppResult<Vec<Rating>> {
        self.store.user_ratings(user_id).await
    }

    /// Fitted flag for each of the five models
    pub async fn model_status(&self) -> BTreeMap<ModelKind, bool> {
        match self.current_models().await {
            Some(models) => models.status().models,
            None => ModelKind::SCORERS.into_iter().map(|kind| (kind, false)).collect(),
        }
    }

    /// Hold-out accuracy of the named model
    pub async fn evaluate(&self, model: &str) -> AppResult<Evaluation> {
        let kind: ModelKind = model.parse()?;
        let models = self.fitted(kind).await?;
        self.run_scoring("evaluation", move || models.evaluate(kind))
            .await
    }

    pub async fn status(&self) -> ServiceStatus {
        ServiceStatus {
            dataset: self.current_models().await.map(|models| models.status()),
            cache: self.cache.stats(),
        }
    }
}
