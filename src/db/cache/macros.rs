/// Serves a fresh cached value or computes, stores and returns a new one.
///
/// Must be the tail expression of a function returning `AppResult<T>`.
/// Errors from `$block` are propagated with `?` and never stored. A value
/// whose computation overlapped an invalidation is returned but not stored.
///
/// # Arguments
/// * `$cache`: a [`MemoCache`](crate::db::cache::MemoCache)
/// * `$key`: the [`CacheKey`](crate::db::cache::CacheKey) of the operation
/// * `$block`: a future computing the value on a miss
///
/// # Example
/// ```rust,ignore
/// memoized!(self.cache, CacheKey::Comparison { user_id, n }, async move {
///     compute_comparison(user_id, n).await
/// })
/// ```
#[macro_export]
macro_rules! memoized {
    ($cache:expr, $key:expr, $block:expr) => {{
        let key = $key;
        if let Some(cached) = $cache.get_fresh(&key) {
            Ok(cached)
        } else {
            let generation = $cache.generation();
            let value = $block.await?;
            $cache.insert_if_current(&key, &value, generation);
            Ok(value)
        }
    }};
}
