use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::collections::HashMap;

use crate::{
    error::{RecError, RecResult},
    models::{validate_rating_value, ItemId, Rating, UserId},
};

/// Value stored in cells with no known rating
pub const UNOBSERVED: f64 = 0.0;

/// Dense user × item rating table.
///
/// Rows follow ascending user id and columns ascending item id. The id → index
/// maps are built once here so scorers never scan the axes.
#[derive(Debug, Clone)]
pub struct RatingMatrix {
    user_ids: Vec<UserId>,
    item_ids: Vec<ItemId>,
    user_index: HashMap<UserId, usize>,
    item_index: HashMap<ItemId, usize>,
    values: Vec<f64>,
}

impl RatingMatrix {
    /// Pivots ratings onto the given axes. Ratings whose user or item is not on
    /// an axis are ignored.
    fn with_axes<'a>(
        user_ids: Vec<UserId>,
        item_ids: Vec<ItemId>,
        ratings: impl IntoIterator<Item = &'a Rating>,
    ) -> Self {
        let user_index: HashMap<UserId, usize> =
            user_ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let item_index: HashMap<ItemId, usize> =
            item_ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let mut values = vec![UNOBSERVED; user_ids.len() * item_ids.len()];

        for rating in ratings {
            if let (Some(&row), Some(&col)) = (
                user_index.get(&rating.user_id),
                item_index.get(&rating.item_id),
            ) {
                values[row * item_ids.len() + col] = rating.value;
            }
        }

        Self {
            user_ids,
            item_ids,
            user_index,
            item_index,
            values,
        }
    }

    /// Pivots a full set of ratings, taking both axes from the ratings themselves
    pub fn from_ratings(ratings: &[Rating]) -> RecResult<Self> {
        let ratings = dedupe_latest(ratings)?;
        let (user_ids, item_ids) = axes(&ratings);
        Ok(Self::with_axes(user_ids, item_ids, &ratings))
    }

    pub fn n_users(&self) -> usize {
        self.user_ids.len()
    }

    pub fn n_items(&self) -> usize {
        self.item_ids.len()
    }

    pub fn user_ids(&self) -> &[UserId] {
        &self.user_ids
    }

    pub fn item_ids(&self) -> &[ItemId] {
        &self.item_ids
    }

    pub fn user_id(&self, row: usize) -> UserId {
        self.user_ids[row]
    }

    pub fn item_id(&self, col: usize) -> ItemId {
        self.item_ids[col]
    }

    /// Row index of a user, or `UnknownUser`
    pub fn user_row(&self, user_id: UserId) -> RecResult<usize> {
        self.user_index
            .get(&user_id)
            .copied()
            .ok_or(RecError::UnknownUser { user_id })
    }

    /// Column index of an item, or `UnknownItem`
    pub fn item_col(&self, item_id: ItemId) -> RecResult<usize> {
        self.item_index
            .get(&item_id)
            .copied()
            .ok_or(RecError::UnknownItem { item_id })
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.item_ids.len() + col]
    }

    pub fn row(&self, row: usize) -> &[f64] {
        let width = self.item_ids.len();
        &self.values[row * width..(row + 1) * width]
    }

    /// Known rating for a pair, if any
    pub fn rating(&self, user_id: UserId, item_id: ItemId) -> Option<f64> {
        let row = self.user_index.get(&user_id)?;
        let col = self.item_index.get(&item_id)?;
        let value = self.get(*row, *col);
        (value != UNOBSERVED).then_some(value)
    }

    /// `(col, rating)` for every observed cell of a row
    pub fn rated_items(&self, row: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.row(row)
            .iter()
            .enumerate()
            .filter(|(_, value)| **value != UNOBSERVED)
            .map(|(col, value)| (col, *value))
    }

    /// Column indices of every unobserved cell of a row, ascending
    pub fn unrated_items(&self, row: usize) -> impl Iterator<Item = usize> + '_ {
        self.row(row)
            .iter()
            .enumerate()
            .filter(|(_, value)| **value == UNOBSERVED)
            .map(|(col, _)| col)
    }

    /// Every observed cell as `(row, col, value)`
    pub fn observed(&self) -> Vec<(usize, usize, f64)> {
        let width = self.item_ids.len();
        self.values
            .iter()
            .enumerate()
            .filter(|(_, value)| **value != UNOBSERVED)
            .map(|(idx, value)| (idx / width, idx % width, *value))
            .collect()
    }

    pub fn n_observed(&self) -> usize {
        self.values.iter().filter(|v| **v != UNOBSERVED).count()
    }

    /// Mean over every cell, observed or not
    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }
}

/// Train/serve matrices built from one rating snapshot.
///
/// Both matrices share the full dataset's axes; the train matrix has the held-out
/// cells reset to [`UNOBSERVED`].
#[derive(Debug, Clone)]
pub struct DatasetSplit {
    pub train: RatingMatrix,
    pub full: RatingMatrix,
    pub test: Vec<Rating>,
}

impl DatasetSplit {
    pub fn n_ratings(&self) -> usize {
        self.test.len() + self.train.n_observed()
    }
}

/// Partitions ratings into train/test with a seeded shuffle and pivots both.
///
/// `split_ratio` is the share of ratings held out for testing. At least one
/// rating always stays in the train partition.
pub fn build(ratings: &[Rating], split_ratio: f64, seed: u64) -> RecResult<DatasetSplit> {
    let mut ratings = dedupe_latest(ratings)?;
    let (user_ids, item_ids) = axes(&ratings);
    let full = RatingMatrix::with_axes(user_ids.clone(), item_ids.clone(), &ratings);

    let mut rng = StdRng::seed_from_u64(seed);
    ratings.shuffle(&mut rng);

    let ratio = if split_ratio.is_finite() {
        split_ratio.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let n_test = ((ratings.len() as f64 * ratio).round() as usize).min(ratings.len() - 1);
    let train_ratings = ratings.split_off(n_test);
    let test = ratings;

    let train = RatingMatrix::with_axes(user_ids, item_ids, &train_ratings);

    tracing::debug!(
        users = full.n_users(),
        items = full.n_items(),
        train = train_ratings.len(),
        test = test.len(),
        "Built rating matrices"
    );

    Ok(DatasetSplit { train, full, test })
}

/// Validates ratings and keeps the latest write per (user, item), sorted by pair
fn dedupe_latest(ratings: &[Rating]) -> RecResult<Vec<Rating>> {
    if ratings.is_empty() {
        return Err(RecError::EmptyDataset);
    }

    let mut latest: HashMap<(UserId, ItemId), &Rating> = HashMap::with_capacity(ratings.len());
    for rating in ratings {
        validate_rating_value(rating.value)?;
        latest
            .entry((rating.user_id, rating.item_id))
            .and_modify(|current| {
                if rating.observed_at >= current.observed_at {
                    *current = rating;
                }
            })
            .or_insert(rating);
    }

    let mut deduped: Vec<Rating> = latest.into_values().cloned().collect();
    deduped.sort_by_key(|r| (r.user_id, r.item_id));
    Ok(deduped)
}

fn axes(ratings: &[Rating]) -> (Vec<UserId>, Vec<ItemId>) {
    let mut user_ids: Vec<UserId> = ratings.iter().map(|r| r.user_id).collect();
    let mut item_ids: Vec<ItemId> = ratings.iter().map(|r| r.item_id).collect();
    user_ids.sort_unstable();
    user_ids.dedup();
    item_ids.sort_unstable();
    item_ids.dedup();
    (user_ids, item_ids)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    pub(crate) fn rating(user_id: UserId, item_id: ItemId, value: f64) -> Rating {
        Rating {
            user_id,
            item_id,
            value,
            observed_at: Utc.timestamp_opt(1_000_000, 0).unwrap(),
        }
    }

    /// Users {1,2,3} × items {10,20,30}
    pub(crate) fn small_ratings() -> Vec<Rating> {
        vec![
            rating(1, 10, 5.0),
            rating(1, 20, 1.0),
            rating(2, 10, 4.0),
            rating(2, 20, 5.0),
            rating(2, 30, 3.0),
            rating(3, 20, 2.0),
            rating(3, 30, 4.0),
        ]
    }

    #[test]
    fn test_empty_dataset_rejected() {
        let err = build(&[], 0.2, 42).unwrap_err();
        assert_eq!(err, RecError::EmptyDataset);
    }

    #[test]
    fn test_zero_rating_rejected() {
        let err = RatingMatrix::from_ratings(&[rating(1, 1, 0.0)]).unwrap_err();
        assert_eq!(err, RecError::InvalidRatingValue { value: 0.0 });
    }

    #[test]
    fn test_full_matrix_maps_every_known_pair() {
        let split = build(&small_ratings(), 0.2, 42).unwrap();
        for r in small_ratings() {
            assert_eq!(split.full.rating(r.user_id, r.item_id), Some(r.value));
        }
        assert_eq!(split.full.rating(1, 30), None);
        assert_eq!(split.full.n_observed(), 7);
    }

    #[test]
    fn test_train_matrix_hides_test_cells() {
        let split = build(&small_ratings(), 0.3, 7).unwrap();
        assert_eq!(split.test.len(), 2);
        assert_eq!(split.train.n_observed(), 5);
        for held_out in &split.test {
            assert_eq!(split.train.rating(held_out.user_id, held_out.item_id), None);
        }
        assert_eq!(split.train.user_ids(), split.full.user_ids());
        assert_eq!(split.train.item_ids(), split.full.item_ids());
    }

    #[test]
    fn test_split_is_reproducible_with_seed() {
        let first = build(&small_ratings(), 0.3, 42).unwrap();
        let second = build(&small_ratings(), 0.3, 42).unwrap();
        assert_eq!(first.test, second.test);
    }

    #[test]
    fn test_split_keeps_one_training_rating() {
        let split = build(&small_ratings(), 1.0, 42).unwrap();
        assert_eq!(split.train.n_observed(), 1);
        assert_eq!(split.test.len(), 6);
    }

    #[test]
    fn test_latest_write_wins() {
        let mut newer = rating(1, 10, 2.0);
        newer.observed_at = Utc.timestamp_opt(2_000_000, 0).unwrap();
        let matrix = RatingMatrix::from_ratings(&[newer, rating(1, 10, 5.0)]).unwrap();
        assert_eq!(matrix.rating(1, 10), Some(2.0));
    }

    #[test]
    fn test_index_lookups() {
        let matrix = RatingMatrix::from_ratings(&small_ratings()).unwrap();
        assert_eq!(matrix.user_row(3).unwrap(), 2);
        assert_eq!(matrix.item_col(20).unwrap(), 1);
        assert_eq!(
            matrix.user_row(99).unwrap_err(),
            RecError::UnknownUser { user_id: 99 }
        );
        assert_eq!(
            matrix.item_col(99).unwrap_err(),
            RecError::UnknownItem { item_id: 99 }
        );
        let unrated: Vec<usize> = matrix.unrated_items(0).collect();
        assert_eq!(unrated, vec![2]);
    }
}
