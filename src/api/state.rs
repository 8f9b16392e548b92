use std::sync::Arc;

use crate::services::{MovieService, RecommendationService};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RecommendationService>,
    pub movies: Arc<MovieService>,
}

impl AppState {
    /// Builds the catalogue service over the recommender's store and catalogue
    pub fn new(service: Arc<RecommendationService>) -> Self {
        let movies = Arc::new(MovieService::new(service.store(), service.shared_catalogue()));
        Self { service, movies }
    }
}
