use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;
use super::AppState;

/// Creates the main API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        // Recommendations
        .route("/recommendations/:user_id", get(handlers::get_recommendations))
        .route("/predict", post(handlers::predict))
        .route("/compare/:user_id", get(handlers::compare_models))
        // Models
        .route("/models", get(handlers::get_models))
        .route("/retrain", post(handlers::retrain))
        .route("/status", get(handlers::status))
        // Catalogue
        .route("/movies", get(handlers::list_movies))
        .route("/movies/random", get(handlers::random_movies))
        .route("/movies/:item_id", get(handlers::get_movie))
        .route(
            "/movies/:item_id/rating/:user_id",
            get(handlers::get_user_movie_rating),
        )
        .route("/search", get(handlers::search_movies))
        // Ratings
        .route("/ratings", post(handlers::rate_item))
        .route("/users/:user_id/ratings", get(handlers::get_user_ratings))
        // Watchlist
        .route("/users/:user_id/watchlist", get(handlers::get_watchlist))
        .route(
            "/users/:user_id/watchlist/:item_id",
            post(handlers::add_to_watchlist).delete(handlers::remove_from_watchlist),
        )
        // Cache
        .route("/cache/invalidate", post(handlers::invalidate_cache))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
