use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::{
    error::AppResult,
    models::{ItemId, Rating, RatingSummary, UserId, WatchlistEntry},
};

/// Persistent source of rating tuples
///
/// The full snapshot must be re-fetchable at any time; the engine refits from
/// `all_ratings` on retrain.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RatingStore: Send + Sync {
    /// Inserts the rating or replaces the existing one for the same pair
    async fn upsert_rating(&self, rating: &Rating) -> AppResult<()>;

    /// Every rating of one user, ordered by item id
    async fn user_ratings(&self, user_id: UserId) -> AppResult<Vec<Rating>>;

    /// Every stored rating
    async fn all_ratings(&self) -> AppResult<Vec<Rating>>;

    /// The user's rating of one item, if any
    async fn rating(&self, user_id: UserId, item_id: ItemId) -> AppResult<Option<Rating>>;

    /// Every rating of one item, ordered by user id
    async fn item_ratings(&self, item_id: ItemId) -> AppResult<Vec<Rating>>;

    /// Average and count per rated item
    async fn rating_summaries(&self) -> AppResult<HashMap<ItemId, RatingSummary>>;

    /// Saves the item to the user's watchlist. Returns false if it was already there.
    async fn add_to_watchlist(&self, user_id: UserId, item_id: ItemId) -> AppResult<bool>;

    /// Returns false if the item was not on the watchlist
    async fn remove_from_watchlist(&self, user_id: UserId, item_id: ItemId) -> AppResult<bool>;

    /// The user's watchlist, most recently added first
    async fn watchlist(&self, user_id: UserId) -> AppResult<Vec<WatchlistEntry>>;
}

/// Rating store held in process memory
#[derive(Default)]
pub struct InMemoryRatingStore {
    ratings: RwLock<HashMap<(UserId, ItemId), Rating>>,
    /// Entries per user in insertion order
    watchlists: RwLock<HashMap<UserId, Vec<WatchlistEntry>>>,
}

impl InMemoryRatingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store; later duplicates of a pair win
    pub fn with_ratings(ratings: impl IntoIterator<Item = Rating>) -> Self {
        let ratings = ratings
            .into_iter()
            .map(|rating| ((rating.user_id, rating.item_id), rating))
            .collect();
        Self {
            ratings: RwLock::new(ratings),
            ..Self::default()
        }
    }
}

#[async_trait]
impl RatingStore for InMemoryRatingStore {
    async fn upsert_rating(&self, rating: &Rating) -> AppResult<()> {
        let mut ratings = self.ratings.write().await;
        ratings.insert((rating.user_id, rating.item_id), rating.clone());
        Ok(())
    }

    async fn user_ratings(&self, user_id: UserId) -> AppResult<Vec<Rating>> {
        let ratings = self.ratings.read().await;
        let mut found: Vec<Rating> = ratings
            .values()
            .filter(|rating| rating.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by_key(|rating| rating.item_id);
        Ok(found)
    }

    async fn all_ratings(&self) -> AppResult<Vec<Rating>> {
        let ratings = self.ratings.read().await;
        let mut all: Vec<Rating> = ratings.values().cloned().collect();
        all.sort_by_key(|rating| (rating.user_id, rating.item_id));
        Ok(all)
    }

    async fn rating(&self, user_id: UserId, item_id: ItemId) -> AppResult<Option<Rating>> {
        Ok(self.ratings.read().await.get(&(user_id, item_id)).cloned())
    }

    async fn item_ratings(&self, item_id: ItemId) -> AppResult<Vec<Rating>> {
        let ratings = self.ratings.read().await;
        let mut found: Vec<Rating> = ratings
            .values()
            .filter(|rating| rating.item_id == item_id)
            .cloned()
            .collect();
        found.sort_by_key(|rating| rating.user_id);
        Ok(found)
    }

    async fn rating_summaries(&self) -> AppResult<HashMap<ItemId, RatingSummary>> {
        let ratings = self.ratings.read().await;
        let mut values: HashMap<ItemId, Vec<f64>> = HashMap::new();
        for rating in ratings.values() {
            values.entry(rating.item_id).or_default().push(rating.value);
        }
        Ok(values
            .into_iter()
            .filter_map(|(item_id, values)| {
                RatingSummary::from_values(values).map(|summary| (item_id, summary))
            })
            .collect())
    }

    async fn add_to_watchlist(&self, user_id: UserId, item_id: ItemId) -> AppResult<bool> {
        let mut watchlists = self.watchlists.write().await;
        let entries = watchlists.entry(user_id).or_default();
        if entries.iter().any(|entry| entry.item_id == item_id) {
            return Ok(false);
        }
        entries.push(WatchlistEntry {
            user_id,
            item_id,
            added_at: Utc::now(),
        });
        Ok(true)
    }

    async fn remove_from_watchlist(&self, user_id: UserId, item_id: ItemId) -> AppResult<bool> {
        let mut watchlists = self.watchlists.write().await;
        let Some(entries) = watchlists.get_mut(&user_id) else {
            return Ok(false);
        };
        let before = entries.len();
        entries.retain(|entry| entry.item_id != item_id);
        Ok(entries.len() < before)
    }

    async fn watchlist(&self, user_id: UserId) -> AppResult<Vec<WatchlistEntry>> {
        let watchlists = self.watchlists.read().await;
        Ok(watchlists
            .get(&user_id)
            .map(|entries| entries.iter().rev().cloned().collect())
            .unwrap_or_default())
    }
}
