pub mod cache;
pub mod movielens;
pub mod postgres;
pub mod store;

pub use cache::{CacheKey, InvalidationScope, MemoCache};
pub use postgres::{create_pool, PgRatingStore};
pub use store::{InMemoryRatingStore, RatingStore};
