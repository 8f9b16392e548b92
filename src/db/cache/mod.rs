pub mod cache;

mod macros;

pub use cache::CacheKey;
pub use cache::CacheStats;
pub use cache::CacheSweeperHandle;
pub use cache::InvalidationScope;
pub use cache::MemoCache;
