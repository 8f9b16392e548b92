use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::{
    db::InvalidationScope,
    error::{AppError, AppResult},
    models::{Candidate, Catalogue, ItemId, ModelKind, Rating, UserId},
    services::{
        ModelOutcome, ModelStatus, MovieDetails, MovieSort, MovieSummary, RatingStats,
        ServiceStatus, WatchlistMovie,
    },
};

use super::AppState;

const DEFAULT_LIST_LENGTH: usize = 10;
const MAX_LIST_LENGTH: usize = 100;
const DEFAULT_SEARCH_LIMIT: usize = 50;
const DEFAULT_RANDOM_LIMIT: usize = 20;

// Request/Response types

#[derive(Debug, Deserialize)]
pub struct RecommendationsQuery {
    pub n: Option<usize>,
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    pub n: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecommendationItem {
    pub item_id: ItemId,
    pub title: String,
    pub predicted_rating: f64,
    pub model: ModelKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub model_scores: BTreeMap<ModelKind, f64>,
}

impl RecommendationItem {
    fn from_candidate(candidate: Candidate, catalogue: &Catalogue) -> Self {
        Self {
            item_id: candidate.item_id,
            title: catalogue.title(candidate.item_id),
            predicted_rating: round2(candidate.score),
            model: candidate.model,
            model_scores: candidate
                .model_scores
                .into_iter()
                .map(|(kind, score)| (kind, round2(score)))
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecommendationsResponse {
    pub user_id: UserId,
    pub model: ModelKind,
    pub recommendations: Vec<RecommendationItem>,
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub title: String,
    pub predicted_rating: f64,
    pub model: ModelKind,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub models: BTreeMap<ModelKind, bool>,
    pub available_models: Vec<ModelKind>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComparisonEntry {
    Recommendations(Vec<RecommendationItem>),
    Error { error: String },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompareResponse {
    pub user_id: UserId,
    pub n_recommendations: usize,
    pub comparison: BTreeMap<ModelKind, ComparisonEntry>,
}

#[derive(Debug, Deserialize)]
pub struct RateRequest {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub rating: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RatedItem {
    pub item_id: ItemId,
    pub title: String,
    pub rating: f64,
    pub observed_at: DateTime<Utc>,
}

impl RatedItem {
    fn from_rating(rating: Rating, catalogue: &Catalogue) -> Self {
        Self {
            item_id: rating.item_id,
            title: catalogue.title(rating.item_id),
            rating: rating.value,
            observed_at: rating.observed_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserRatingsResponse {
    pub user_id: UserId,
    pub total_ratings: usize,
    pub ratings: Vec<RatedItem>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvalidateRequest {
    pub user_id: Option<UserId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub removed: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub total_items: usize,
    #[serde(flatten)]
    pub service: ServiceStatus,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub sort: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MovieItem {
    pub id: ItemId,
    pub title: String,
    pub year: Option<i32>,
    pub genres: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_rating_count: Option<usize>,
}

impl From<MovieSummary> for MovieItem {
    fn from(movie: MovieSummary) -> Self {
        Self {
            id: movie.item_id,
            title: movie.title,
            year: movie.year,
            genres: movie.genres,
            user_rating: movie.rating.map(|r| round2(r.average)),
            user_rating_count: movie.rating.map(|r| r.count),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MoviesResponse {
    pub movies: Vec<MovieItem>,
    pub total: usize,
}

impl MoviesResponse {
    fn new(movies: Vec<MovieSummary>) -> Self {
        let movies: Vec<MovieItem> = movies.into_iter().map(MovieItem::from).collect();
        Self {
            total: movies.len(),
            movies,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub sort: String,
    #[serde(flatten)]
    pub results: MoviesResponse,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MovieStats {
    pub average_rating: f64,
    pub total_ratings: usize,
    pub rating_distribution: BTreeMap<String, usize>,
}

impl From<RatingStats> for MovieStats {
    fn from(stats: RatingStats) -> Self {
        Self {
            average_rating: round2(stats.average),
            total_ratings: stats.count,
            rating_distribution: stats.distribution,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MovieDetailsResponse {
    pub id: ItemId,
    pub title: String,
    pub year: Option<i32>,
    pub genres: Vec<String>,
    pub stats: Option<MovieStats>,
}

impl From<MovieDetails> for MovieDetailsResponse {
    fn from(details: MovieDetails) -> Self {
        Self {
            id: details.item_id,
            title: details.title,
            year: details.year,
            genres: details.genres,
            stats: details.stats.map(MovieStats::from),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserMovieRatingResponse {
    pub movie_id: ItemId,
    pub user_id: UserId,
    pub rating: Option<f64>,
    pub has_rated: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WatchlistItem {
    #[serde(flatten)]
    pub movie: MovieItem,
    pub added_at: DateTime<Utc>,
}

impl From<WatchlistMovie> for WatchlistItem {
    fn from(entry: WatchlistMovie) -> Self {
        Self {
            movie: entry.movie.into(),
            added_at: entry.added_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WatchlistResponse {
    pub user_id: UserId,
    pub total_movies: usize,
    pub watchlist: Vec<WatchlistItem>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WatchlistUpdateResponse {
    pub user_id: UserId,
    pub movie_id: ItemId,
    /// Whether the movie is on the watchlist after the request
    pub on_watchlist: bool,
    /// False when the request left the watchlist as it was
    pub changed: bool,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn list_length(n: Option<usize>) -> AppResult<usize> {
    match n.unwrap_or(DEFAULT_LIST_LENGTH) {
        n @ 1..=MAX_LIST_LENGTH => Ok(n),
        n => Err(AppError::InvalidInput(format!(
            "n must be between 1 and {}, got {}",
            MAX_LIST_LENGTH, n
        ))),
    }
}

fn positive_limit(limit: usize) -> AppResult<usize> {
    match limit {
        0 => Err(AppError::InvalidInput("limit must be positive".to_string())),
        limit => Ok(limit),
    }
}

// Handlers

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let models_loaded = state.service.model_status().await.values().any(|fitted| *fitted);
    (
        StatusCode::OK,
        Json(json!({ "status": "healthy", "models_loaded": models_loaded })),
    )
}

/// Ranked recommendations for a user
pub async fn get_recommendations(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(params): Query<RecommendationsQuery>,
) -> AppResult<Json<RecommendationsResponse>> {
    let n = list_length(params.n)?;
    let model = params.model.as_deref().unwrap_or(ModelKind::Ensemble.as_str());
    let kind: ModelKind = model.parse()?;

    let candidates = state.service.get_recommendations(user_id, n, model).await?;
    let catalogue = state.service.catalogue();

    Ok(Json(RecommendationsResponse {
        user_id,
        model: kind,
        recommendations: candidates
            .into_iter()
            .map(|candidate| RecommendationItem::from_candidate(candidate, catalogue))
            .collect(),
    }))
}

/// Single rating prediction, `svd` unless a model is named
pub async fn predict(
    State(state): State<AppState>,
    Json(request): Json<PredictRequest>,
) -> AppResult<Json<PredictResponse>> {
    let model = request.model.as_deref().unwrap_or(ModelKind::Svd.as_str());
    let prediction = state
        .service
        .predict_rating(request.user_id, request.item_id, model)
        .await?;

    Ok(Json(PredictResponse {
        user_id: prediction.user_id,
        item_id: prediction.item_id,
        title: state.service.catalogue().title(prediction.item_id),
        predicted_rating: round2(prediction.predicted_rating),
        model: prediction.model,
    }))
}

/// Fitted status per model and every accepted model name
pub async fn get_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: state.service.model_status().await,
        available_models: ModelKind::ALL.to_vec(),
    })
}

/// Every model's list side by side
pub async fn compare_models(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(params): Query<CompareQuery>,
) -> AppResult<Json<CompareResponse>> {
    let n = list_length(params.n)?;
    let outcomes = state.service.compare_models(user_id, n).await?;
    let catalogue = state.service.catalogue();

    let comparison = outcomes
        .into_iter()
        .map(|(kind, outcome)| {
            let entry = match outcome {
                ModelOutcome::Success { recommendations } => ComparisonEntry::Recommendations(
                    recommendations
                        .into_iter()
                        .map(|candidate| RecommendationItem::from_candidate(candidate, catalogue))
                        .collect(),
                ),
                ModelOutcome::Error { message } => ComparisonEntry::Error { error: message },
            };
            (kind, entry)
        })
        .collect();

    Ok(Json(CompareResponse {
        user_id,
        n_recommendations: n,
        comparison,
    }))
}

/// Stores a rating; the user's cached results are dropped before responding
pub async fn rate_item(
    State(state): State<AppState>,
    Json(request): Json<RateRequest>,
) -> AppResult<(StatusCode, Json<RatedItem>)> {
    let rating = state
        .service
        .rate_item(request.user_id, request.item_id, request.rating)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RatedItem::from_rating(rating, state.service.catalogue())),
    ))
}

/// Every stored rating of a user
pub async fn get_user_ratings(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> AppResult<Json<UserRatingsResponse>> {
    let ratings = state.service.user_ratings(user_id).await?;
    let catalogue = state.service.catalogue();
    let ratings: Vec<RatedItem> = ratings
        .into_iter()
        .map(|rating| RatedItem::from_rating(rating, catalogue))
        .collect();

    Ok(Json(UserRatingsResponse {
        user_id,
        total_ratings: ratings.len(),
        ratings,
    }))
}

/// Drops cached results for one user, or all of them
pub async fn invalidate_cache(
    State(state): State<AppState>,
    request: Option<Json<InvalidateRequest>>,
) -> Json<InvalidateResponse> {
    let request = request.map(|Json(request)| request).unwrap_or_default();
    let scope = match request.user_id {
        Some(user_id) => InvalidationScope::User(user_id),
        None => InvalidationScope::All,
    };

    Json(InvalidateResponse {
        removed: state.service.invalidate_cache(scope),
    })
}

/// Refits every model from the current contents of the rating store
pub async fn retrain(State(state): State<AppState>) -> AppResult<Json<ModelStatus>> {
    let status = state.service.reload().await?;
    Ok(Json(status))
}

/// Dataset dimensions and cache counters
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "running",
        total_items: state.service.catalogue().len(),
        service: state.service.status().await,
    })
}

/// The catalogue in id order with rating summaries
pub async fn list_movies(
    State(state): State<AppState>,
    Query(params): Query<LimitQuery>,
) -> AppResult<Json<MoviesResponse>> {
    let limit = params.limit.map(positive_limit).transpose()?;
    let movies = state.movies.list_movies(limit).await?;
    Ok(Json(MoviesResponse::new(movies)))
}

/// Title search, `?q=` required
pub async fn search_movies(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> AppResult<Json<SearchResponse>> {
    let query = params.q.unwrap_or_default();
    let sort_name = params.sort.unwrap_or_else(|| "title".to_string());
    let sort: MovieSort = sort_name.parse()?;
    let limit = positive_limit(params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT))?;

    let movies = state.movies.search(&query, sort, limit).await?;
    Ok(Json(SearchResponse {
        query,
        sort: sort_name,
        results: MoviesResponse::new(movies),
    }))
}

/// A random sample of the catalogue for browsing
pub async fn random_movies(
    State(state): State<AppState>,
    Query(params): Query<LimitQuery>,
) -> AppResult<Json<MoviesResponse>> {
    let limit = positive_limit(params.limit.unwrap_or(DEFAULT_RANDOM_LIMIT))?;
    let movies = state.movies.random_movies(limit).await?;
    Ok(Json(MoviesResponse::new(movies)))
}

/// One movie with its rating statistics
pub async fn get_movie(
    State(state): State<AppState>,
    Path(item_id): Path<ItemId>,
) -> AppResult<Json<MovieDetailsResponse>> {
    let details = state.movies.movie_details(item_id).await?;
    Ok(Json(details.into()))
}

/// A user's stored rating of one movie
pub async fn get_user_movie_rating(
    State(state): State<AppState>,
    Path((item_id, user_id)): Path<(ItemId, UserId)>,
) -> AppResult<Json<UserMovieRatingResponse>> {
    let rating = state.movies.user_rating(user_id, item_id).await?;
    Ok(Json(UserMovieRatingResponse {
        movie_id: item_id,
        user_id,
        has_rated: rating.is_some(),
        rating: rating.map(|r| r.value),
    }))
}

pub async fn get_watchlist(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> AppResult<Json<WatchlistResponse>> {
    let watchlist: Vec<WatchlistItem> = state
        .movies
        .watchlist(user_id)
        .await?
        .into_iter()
        .map(WatchlistItem::from)
        .collect();

    Ok(Json(WatchlistResponse {
        user_id,
        total_movies: watchlist.len(),
        watchlist,
    }))
}

pub async fn add_to_watchlist(
    State(state): State<AppState>,
    Path((user_id, item_id)): Path<(UserId, ItemId)>,
) -> AppResult<Json<WatchlistUpdateResponse>> {
    let changed = state.movies.add_to_watchlist(user_id, item_id).await?;
    Ok(Json(WatchlistUpdateResponse {
        user_id,
        movie_id: item_id,
        on_watchlist: true,
        changed,
    }))
}

pub async fn remove_from_watchlist(
    State(state): State<AppState>,
    Path((user_id, item_id)): Path<(UserId, ItemId)>,
) -> AppResult<Json<WatchlistUpdateResponse>> {
    let changed = state.movies.remove_from_watchlist(user_id, item_id).await?;
    Ok(Json(WatchlistUpdateResponse {
        user_id,
        movie_id: item_id,
        on_watchlist: false,
        changed,
    }))
}
