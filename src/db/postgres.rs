use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::collections::HashMap;

use super::store::RatingStore;
use crate::{
    error::AppResult,
    models::{ItemId, Rating, RatingSummary, UserId, WatchlistEntry},
};

/// Creates a PostgreSQL connection pool
///
/// Establishes a pool of database connections for efficient reuse.
/// The pool automatically manages connection lifecycle and limits.
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    Ok(pool)
}

#[derive(Debug, sqlx::FromRow)]
struct RatingRow {
    user_id: i64,
    item_id: i64,
    value: f64,
    observed_at: DateTime<Utc>,
}

impl From<RatingRow> for Rating {
    fn from(row: RatingRow) -> Self {
        Self {
            user_id: row.user_id,
            item_id: row.item_id,
            value: row.value,
            observed_at: row.observed_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SummaryRow {
    item_id: i64,
    average: f64,
    count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct WatchlistRow {
    user_id: i64,
    item_id: i64,
    added_at: DateTime<Utc>,
}

impl From<WatchlistRow> for WatchlistEntry {
    fn from(row: WatchlistRow) -> Self {
        Self {
            user_id: row.user_id,
            item_id: row.item_id,
            added_at: row.added_at,
        }
    }
}

/// Rating store backed by the `ratings` and `watchlist` tables
#[derive(Clone)]
pub struct PgRatingStore {
    pool: PgPool,
}

impl PgRatingStore {
    /// Wraps the pool and applies pending migrations
    pub async fn new(pool: PgPool) -> anyhow::Result<Self> {
        sqlx::migrate!().run(&pool).await?;
        tracing::info!("Database migrations applied");
        Ok(Self { pool })
    }

    /// Number of stored ratings
    pub async fn count(&self) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ratings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Inserts many ratings in one transaction
    pub async fn import(&self, ratings: &[Rating]) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        for rating in ratings {
            sqlx::query(UPSERT_RATING)
                .bind(rating.user_id)
                .bind(rating.item_id)
                .bind(rating.value)
                .bind(rating.observed_at)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        tracing::info!(count = ratings.len(), "Imported ratings into database");
        Ok(())
    }
}

const UPSERT_RATING: &str = "INSERT INTO ratings (user_id, item_id, value, observed_at) \
     VALUES ($1, $2, $3, $4) \
     ON CONFLICT (user_id, item_id) \
     DO UPDATE SET value = EXCLUDED.value, observed_at = EXCLUDED.observed_at";

#[async_trait]
impl RatingStore for PgRatingStore {
    async fn upsert_rating(&self, rating: &Rating) -> AppResult<()> {
        sqlx::query(UPSERT_RATING)
            .bind(rating.user_id)
            .bind(rating.item_id)
            .bind(rating.value)
            .bind(rating.observed_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn user_ratings(&self, user_id: UserId) -> AppResult<Vec<Rating>> {
        let rows: Vec<RatingRow> = sqlx::query_as(
            "SELECT user_id, item_id, value, observed_at FROM ratings \
             WHERE user_id = $1 ORDER BY item_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Rating::from).collect())
    }

    async fn all_ratings(&self) -> AppResult<Vec<Rating>> {
        let rows: Vec<RatingRow> = sqlx::query_as(
            "SELECT user_id, item_id, value, observed_at FROM ratings ORDER BY user_id, item_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Rating::from).collect())
    }

    async fn rating(&self, user_id: UserId, item_id: ItemId) -> AppResult<Option<Rating>> {
        let row: Option<RatingRow> = sqlx::query_as(
            "SELECT user_id, item_id, value, observed_at FROM ratings \
             WHERE user_id = $1 AND item_id = $2",
        )
        .bind(user_id)
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Rating::from))
    }

    async fn item_ratings(&self, item_id: ItemId) -> AppResult<Vec<Rating>> {
        let rows: Vec<RatingRow> = sqlx::query_as(
            "SELECT user_id, item_id, value, observed_at FROM ratings \
             WHERE item_id = $1 ORDER BY user_id",
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Rating::from).collect())
    }

    async fn rating_summaries(&self) -> AppResult<HashMap<ItemId, RatingSummary>> {
        let rows: Vec<SummaryRow> = sqlx::query_as(
            "SELECT item_id, AVG(value) AS average, COUNT(*) AS count \
             FROM ratings GROUP BY item_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let summary = RatingSummary {
                    average: row.average,
                    count: row.count as usize,
                };
                (row.item_id, summary)
            })
            .collect())
    }

    async fn add_to_watchlist(&self, user_id: UserId, item_id: ItemId) -> AppResult<bool> {
        let result = sqlx::query(
            "INSERT INTO watchlist (user_id, item_id) VALUES ($1, $2) \
             ON CONFLICT (user_id, item_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(item_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_from_watchlist(&self, user_id: UserId, item_id: ItemId) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM watchlist WHERE user_id = $1 AND item_id = $2")
            .bind(user_id)
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn watchlist(&self, user_id: UserId) -> AppResult<Vec<WatchlistEntry>> {
        let rows: Vec<WatchlistRow> = sqlx::query_as(
            "SELECT user_id, item_id, added_at FROM watchlist \
             WHERE user_id = $1 ORDER BY added_at DESC, item_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(WatchlistEntry::from).collect())
    }
}
