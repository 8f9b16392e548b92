use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ItemId, UserId};
use crate::error::{RecError, RecResult};

pub const MIN_RATING: f64 = 1.0;
pub const MAX_RATING: f64 = 5.0;

/// A single explicit rating of an item by a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub value: f64,
    pub observed_at: DateTime<Utc>,
}

impl Rating {
    /// Creates a rating, rejecting values outside [1, 5]
    pub fn new(
        user_id: UserId,
        item_id: ItemId,
        value: f64,
        observed_at: DateTime<Utc>,
    ) -> RecResult<Self> {
        validate_rating_value(value)?;
        Ok(Self {
            user_id,
            item_id,
            value,
            observed_at,
        })
    }
}

/// Mean and count of the stored ratings of one item
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingSummary {
    pub average: f64,
    pub count: usize,
}

impl RatingSummary {
    /// Summary of a non-empty set of values
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        let (sum, count) = values
            .into_iter()
            .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
        (count > 0).then(|| Self {
            average: sum / count as f64,
            count,
        })
    }
}

/// Checks a rating value against the valid range.
///
/// Zero is the matrix sentinel for "unobserved" and falls outside the range,
/// so it can never enter a matrix as a real rating.
pub fn validate_rating_value(value: f64) -> RecResult<()> {
    if value.is_finite() && (MIN_RATING..=MAX_RATING).contains(&value) {
        Ok(())
    } else {
        Err(RecError::InvalidRatingValue { value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ratings_accepted() {
        for value in [1.0, 2.5, 5.0] {
            assert!(Rating::new(1, 2, value, Utc::now()).is_ok());
        }
    }

    #[test]
    fn test_zero_rating_rejected() {
        let err = Rating::new(1, 2, 0.0, Utc::now()).unwrap_err();
        assert_eq!(err, RecError::InvalidRatingValue { value: 0.0 });
    }

    #[test]
    fn test_summary_of_values() {
        let summary = RatingSummary::from_values([5.0, 4.0, 3.0]).unwrap();
        assert_eq!(summary, RatingSummary { average: 4.0, count: 3 });
        assert!(RatingSummary::from_values(Vec::new()).is_none());
    }

    #[test]
    fn test_out_of_range_and_nan_rejected() {
        assert!(validate_rating_value(5.5).is_err());
        assert!(validate_rating_value(-1.0).is_err());
        assert!(validate_rating_value(f64::NAN).is_err());
    }
}
