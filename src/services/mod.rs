pub mod engine;
pub mod ensemble;
pub mod matrix;
pub mod movies;
pub mod recommendations;
pub mod scorers;

pub use engine::{EngineConfig, Evaluation, ModelSet, ModelStatus};
pub use ensemble::EnsembleWeights;
pub use movies::{MovieDetails, MovieService, MovieSort, MovieSummary, RatingStats, WatchlistMovie};
pub use recommendations::{ModelOutcome, RecommendationService, ServiceSettings, ServiceStatus};
