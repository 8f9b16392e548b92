use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, collections::BTreeMap, str::FromStr, sync::Arc};

use crate::{
    db::RatingStore,
    error::{AppError, AppResult},
    models::{CatalogItem, Catalogue, ItemId, Rating, RatingSummary, UserId},
};

/// Catalogue entry with its stored rating summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieSummary {
    pub item_id: ItemId,
    pub title: String,
    pub year: Option<i32>,
    pub genres: Vec<String>,
    /// Absent while nobody has rated the movie
    pub rating: Option<RatingSummary>,
}

impl MovieSummary {
    fn new(item_id: ItemId, item: &CatalogItem, rating: Option<RatingSummary>) -> Self {
        Self {
            item_id,
            title: item.title.clone(),
            year: item.year(),
            genres: item.tags.clone(),
            rating,
        }
    }
}

/// Rating statistics of one movie
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingStats {
    pub average: f64,
    pub count: usize,
    /// Number of ratings per distinct value
    pub distribution: BTreeMap<String, usize>,
}

impl RatingStats {
    fn from_ratings(ratings: &[Rating]) -> Option<Self> {
        let summary = RatingSummary::from_values(ratings.iter().map(|r| r.value))?;
        let mut distribution = BTreeMap::new();
        for rating in ratings {
            *distribution.entry(rating.value.to_string()).or_insert(0) += 1;
        }
        Some(Self {
            average: summary.average,
            count: summary.count,
            distribution,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieDetails {
    pub item_id: ItemId,
    pub title: String,
    pub year: Option<i32>,
    pub genres: Vec<String>,
    pub stats: Option<RatingStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistMovie {
    #[serde(flatten)]
    pub movie: MovieSummary,
    pub added_at: DateTime<Utc>,
}

/// Ordering of search results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MovieSort {
    /// Title, ascending
    #[default]
    Title,
    /// Item id, ascending
    Id,
    /// Release year, newest first; titles without a year last
    Year,
    /// Average rating, highest first; unrated last
    Rating,
}

impl FromStr for MovieSort {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "title" => Ok(MovieSort::Title),
            "id" => Ok(MovieSort::Id),
            "year" => Ok(MovieSort::Year),
            "rating" => Ok(MovieSort::Rating),
            _ => Err(AppError::InvalidInput(format!(
                "Unknown sort '{}', expected one of title, id, year, rating",
                s
            ))),
        }
    }
}

impl MovieSort {
    fn compare(&self, a: &MovieSummary, b: &MovieSummary) -> Ordering {
        match self {
            MovieSort::Title => a.title.cmp(&b.title),
            MovieSort::Id => a.item_id.cmp(&b.item_id),
            MovieSort::Year => b.year.cmp(&a.year),
            MovieSort::Rating => {
                let average = |m: &MovieSummary| m.rating.map_or(0.0, |r| r.average);
                average(b).total_cmp(&average(a))
            }
        }
    }
}

fn not_found(item_id: ItemId) -> AppError {
    AppError::NotFound(format!("Movie {}", item_id))
}

/// Catalogue browsing and per-user movie lists over the rating store
pub struct MovieService {
    store: Arc<dyn RatingStore>,
    catalogue: Arc<Catalogue>,
}

impl MovieService {
    pub fn new(store: Arc<dyn RatingStore>, catalogue: Arc<Catalogue>) -> Self {
        Self { store, catalogue }
    }

    fn require(&self, item_id: ItemId) -> AppResult<&CatalogItem> {
        self.catalogue.get(item_id).ok_or_else(|| not_found(item_id))
    }

    async fn summaries<'a>(
        &self,
        items: impl IntoIterator<Item = (ItemId, &'a CatalogItem)>,
    ) -> AppResult<Vec<MovieSummary>> {
        let ratings = self.store.rating_summaries().await?;
        Ok(items
            .into_iter()
            .map(|(item_id, item)| MovieSummary::new(item_id, item, ratings.get(&item_id).copied()))
            .collect())
    }

    /// Catalogue in id order, optionally truncated
    #[tracing::instrument(skip(self))]
    pub async fn list_movies(&self, limit: Option<usize>) -> AppResult<Vec<MovieSummary>> {
        let items = self.catalogue.items();
        let take = limit.unwrap_or(items.len());
        self.summaries(items.into_iter().take(take)).await
    }

    /// Title substring search, sorted then truncated
    #[tracing::instrument(skip(self))]
    pub async fn search(
        &self,
        query: &str,
        sort: MovieSort,
        limit: usize,
    ) -> AppResult<Vec<MovieSummary>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::InvalidInput(
                "Query parameter q is required".to_string(),
            ));
        }

        let mut movies = self.summaries(self.catalogue.search(query)).await?;
        movies.sort_by(|a, b| sort.compare(a, b));
        movies.truncate(limit);
        tracing::debug!(query, found = movies.len(), "Searched catalogue");
        Ok(movies)
    }

    /// Up to `limit` distinct movies drawn uniformly from the catalogue
    pub async fn random_movies(&self, limit: usize) -> AppResult<Vec<MovieSummary>> {
        let items = self.catalogue.items();
        let picked: Vec<(ItemId, &CatalogItem)> = items
            .choose_multiple(&mut rand::thread_rng(), limit)
            .copied()
            .collect();
        self.summaries(picked).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn movie_details(&self, item_id: ItemId) -> AppResult<MovieDetails> {
        let item = self.require(item_id)?;
        let ratings = self.store.item_ratings(item_id).await?;
        Ok(MovieDetails {
            item_id,
            title: item.title.clone(),
            year: item.year(),
            genres: item.tags.clone(),
            stats: RatingStats::from_ratings(&ratings),
        })
    }

    /// The user's stored rating of a catalogue movie
    pub async fn user_rating(&self, user_id: UserId, item_id: ItemId) -> AppResult<Option<Rating>> {
        self.require(item_id)?;
        self.store.rating(user_id, item_id).await
    }

    /// Watchlist entries still present in the catalogue, newest first
    #[tracing::instrument(skip(self))]
    pub async fn watchlist(&self, user_id: UserId) -> AppResult<Vec<WatchlistMovie>> {
        let entries = self.store.watchlist(user_id).await?;
        let ratings = self.store.rating_summaries().await?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                let item = self.catalogue.get(entry.item_id)?;
                let rating = ratings.get(&entry.item_id).copied();
                Some(WatchlistMovie {
                    movie: MovieSummary::new(entry.item_id, item, rating),
                    added_at: entry.added_at,
                })
            })
            .collect())
    }

    /// Returns false if the movie was already on the watchlist
    #[tracing::instrument(skip(self))]
    pub async fn add_to_watchlist(&self, user_id: UserId, item_id: ItemId) -> AppResult<bool> {
        self.require(item_id)?;
        let added = self.store.add_to_watchlist(user_id, item_id).await?;
        tracing::info!(user_id, item_id, added, "Watchlist add");
        Ok(added)
    }

    /// Returns false if the movie was not on the watchlist
    #[tracing::instrument(skip(self))]
    pub async fn remove_from_watchlist(&self, user_id: UserId, item_id: ItemId) -> AppResult<bool> {
        self.require(item_id)?;
        let removed = self.store.remove_from_watchlist(user_id, item_id).await?;
        tracing::info!(user_id, item_id, removed, "Watchlist remove");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::InMemoryRatingStore, services::matrix::tests::rating};

    fn service() -> MovieService {
        let item = |title: &str, tag: &str| CatalogItem {
            title: title.to_string(),
            tags: vec![tag.to_string()],
        };
        let catalogue: Catalogue = [
            (1, item("Heat (1995)", "Crime")),
            (2, item("Alien (1979)", "Sci-Fi")),
            (3, item("Aliens (1986)", "Sci-Fi")),
            (4, item("Untitled", "Drama")),
        ]
        .into_iter()
        .collect();
        let store = InMemoryRatingStore::with_ratings(vec![
            rating(1, 2, 3.0),
            rating(2, 2, 4.0),
            rating(1, 3, 5.0),
            rating(2, 3, 5.0),
            rating(3, 3, 4.0),
        ]);
        MovieService::new(Arc::new(store), Arc::new(catalogue))
    }

    fn ids(movies: &[MovieSummary]) -> Vec<ItemId> {
        movies.iter().map(|m| m.item_id).collect()
    }

    #[tokio::test]
    async fn test_list_attaches_year_and_rating() {
        let movies = service().list_movies(None).await.unwrap();
        assert_eq!(ids(&movies), vec![1, 2, 3, 4]);
        assert_eq!(movies[0].year, Some(1995));
        assert_eq!(movies[0].rating, None);
        assert_eq!(movies[1].rating, Some(RatingSummary { average: 3.5, count: 2 }));
        assert_eq!(movies[3].year, None);

        assert_eq!(service().list_movies(Some(2)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_search_sort_orders() {
        let service = &service();
        let by = |sort| async move { ids(&service.search("e", sort, 50).await.unwrap()) };

        assert_eq!(by(MovieSort::Title).await, vec![2, 3, 1, 4]);
        assert_eq!(by(MovieSort::Id).await, vec![1, 2, 3, 4]);
        assert_eq!(by(MovieSort::Year).await, vec![1, 3, 2, 4]);
        assert_eq!(by(MovieSort::Rating).await, vec![3, 2, 1, 4]);
    }

    #[tokio::test]
    async fn test_search_requires_query_and_truncates() {
        let service = service();
        let err = service.search("  ", MovieSort::Title, 10).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));

        let found = service.search("ALIEN", MovieSort::Id, 1).await.unwrap();
        assert_eq!(ids(&found), vec![2]);
    }

    #[test]
    fn test_sort_parsing() {
        assert_eq!("Rating".parse::<MovieSort>().unwrap(), MovieSort::Rating);
        assert!(matches!(
            "popularity".parse::<MovieSort>(),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_random_movies_are_distinct_and_bounded() {
        let service = service();
        let mut picked = ids(&service.random_movies(3).await.unwrap());
        picked.sort_unstable();
        picked.dedup();
        assert_eq!(picked.len(), 3);
        assert_eq!(service.random_movies(50).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_details_distribution_and_missing_movie() {
        let service = service();
        let details = service.movie_details(3).await.unwrap();
        let stats = details.stats.unwrap();
        assert_eq!(stats.count, 3);
        assert!((stats.average - 14.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.distribution["5"], 2);
        assert_eq!(stats.distribution["4"], 1);

        assert!(service.movie_details(1).await.unwrap().stats.is_none());
        let err = service.movie_details(99).await.unwrap_err();
        assert_eq!(err.to_string(), "Not found: Movie 99");
    }

    #[tokio::test]
    async fn test_user_rating_lookup() {
        let service = service();
        assert_eq!(service.user_rating(1, 2).await.unwrap().map(|r| r.value), Some(3.0));
        assert!(service.user_rating(1, 1).await.unwrap().is_none());
        assert!(matches!(
            service.user_rating(1, 99).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_watchlist_round_trip() {
        let service = service();
        assert!(service.add_to_watchlist(7, 1).await.unwrap());
        assert!(service.add_to_watchlist(7, 3).await.unwrap());
        assert!(!service.add_to_watchlist(7, 1).await.unwrap());
        assert!(matches!(
            service.add_to_watchlist(7, 99).await,
            Err(AppError::NotFound(_))
        ));

        let watchlist = service.watchlist(7).await.unwrap();
        let items: Vec<ItemId> = watchlist.iter().map(|w| w.movie.item_id).collect();
        assert_eq!(items, vec![3, 1]);
        assert_eq!(watchlist[0].movie.rating.map(|r| r.count), Some(3));

        assert!(service.remove_from_watchlist(7, 3).await.unwrap());
        assert!(!service.remove_from_watchlist(7, 3).await.unwrap());
        assert!(matches!(
            service.remove_from_watchlist(7, 99).await,
            Err(AppError::NotFound(_))
        ));
        assert_eq!(service.watchlist(7).await.unwrap().len(), 1);
    }
}
