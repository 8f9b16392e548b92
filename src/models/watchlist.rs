use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ItemId, UserId};

/// An item a user saved for later
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub added_at: DateTime<Utc>,
}
