use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

use crate::error::RecError;

mod candidate;
mod catalogue;
mod rating;
mod watchlist;

pub use candidate::{Candidate, Prediction};
pub use catalogue::{extract_year, CatalogItem, Catalogue};
pub use rating::{validate_rating_value, Rating, RatingSummary, MAX_RATING, MIN_RATING};
pub use watchlist::WatchlistEntry;

/// User identity as found in the rating feed
pub type UserId = i64;

/// Item identity as found in the rating feed and catalogue
pub type ItemId = i64;

/// Scoring models the engine can be asked for by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Unconstrained latent factors (truncated SVD)
    Svd,
    /// Non-negative latent factors
    Nmf,
    /// Item-based neighbor averaging
    ItemKnn,
    /// User-based neighbor averaging
    UserKnn,
    /// Tag-vector similarity
    Content,
    /// Weighted blend of other models
    Ensemble,
}

impl ModelKind {
    /// Every individually fitted model, in reporting order
    pub const SCORERS: [ModelKind; 5] = [
        ModelKind::Svd,
        ModelKind::Nmf,
        ModelKind::ItemKnn,
        ModelKind::UserKnn,
        ModelKind::Content,
    ];

    /// Every name accepted by the public operations
    pub const ALL: [ModelKind; 6] = [
        ModelKind::Svd,
        ModelKind::Nmf,
        ModelKind::ItemKnn,
        ModelKind::UserKnn,
        ModelKind::Content,
        ModelKind::Ensemble,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Svd => "svd",
            ModelKind::Nmf => "nmf",
            ModelKind::ItemKnn => "item_knn",
            ModelKind::UserKnn => "user_knn",
            ModelKind::Content => "content",
            ModelKind::Ensemble => "ensemble",
        }
    }
}

impl Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = RecError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let normalized = name.trim().to_ascii_lowercase();
        ModelKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| RecError::UnknownModel {
                name: name.to_string(),
            })
    }
}
