use crate::cache::{CacheLoader, CacheStats, LruCache};
use crate::error::RenderResult;

/// LRU cache bracketed by periods (frames).
///
/// Entries touched in the current period are pinned. An entry left untouched
/// for more than `retain_periods` whole periods is closed at the next period
/// boundary, so objects keyed by churning lights survive brief absences
/// without piling up.
pub struct PeriodicCache<L: CacheLoader> {
    inner: LruCache<L>,
    period: u64,
    retain_periods: u32,
    in_period: bool,
}

impl<L: CacheLoader> PeriodicCache<L> {
    pub fn new(loader: L, capacity: u64, retain_periods: u32) -> Self {
        Self {
            inner: LruCache::new(loader, capacity),
            period: 0,
            retain_periods,
            in_period: false,
        }
    }

    /// Starts a new period. Every resident entry becomes "not yet touched";
    /// entries stale for longer than the retention window are closed.
    pub fn period_start(&mut self, ctx: &mut L::Context) -> usize {
        if self.in_period {
            log::warn!("period_start called twice without period_end");
        }
        self.period += 1;
        self.in_period = true;
        let period = self.period;
        let retain = u64::from(self.retain_periods);
        let evicted = self
            .inner
            .evict_where(ctx, &|entry| entry.period + retain < period - 1);
        if evicted > 0 {
            log::debug!("Period {} dropped {} stale entries", period, evicted);
        }
        evicted
    }

    /// Returns the value for `key`, marking it touched in this period.
    pub fn get(&mut self, ctx: &mut L::Context, key: &L::Key) -> RenderResult<&L::Value> {
        let period = self.period;
        self.inner
            .ensure_with(ctx, key, period, &|entry| entry.period < period)?;
        self.inner.lookup(key)
    }

    pub fn period_end(&mut self) {
        if !self.in_period {
            log::warn!("period_end called outside a period");
        }
        self.in_period = false;
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    pub fn in_period(&self) -> bool {
        self.in_period
    }

    pub fn retain_periods(&self) -> u32 {
        self.retain_periods
    }

    pub fn contains(&self, key: &L::Key) -> bool {
        self.inner.contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn resident_bytes(&self) -> u64 {
        self.inner.resident_bytes()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }

    pub fn loader(&self) -> &L {
        self.inner.loader()
    }

    pub fn clear(&mut self, ctx: &mut L::Context) {
        self.inner.clear(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::testing::CountingLoader;
    use crate::error::RenderError;

    fn frame(cache: &mut PeriodicCache<CountingLoader>, keys: &[u64]) {
        cache.period_start(&mut ());
        for key in keys {
            cache.get(&mut (), key).expect("fits");
        }
        cache.period_end();
    }

    #[test]
    fn entries_survive_the_retention_window() {
        let mut cache = PeriodicCache::new(CountingLoader::default(), 100, 2);
        frame(&mut cache, &[5, 6]);
        frame(&mut cache, &[5]);
        frame(&mut cache, &[5]);
        frame(&mut cache, &[5]);
        assert!(cache.contains(&6), "untouched for two full periods is retained");
        frame(&mut cache, &[5]);
        assert!(!cache.contains(&6), "untouched for three full periods is dropped");
        assert!(cache.contains(&5));
        assert_eq!(cache.loader().loads, 2);
        cache.clear(&mut ());
    }

    #[test]
    fn zero_retention_keeps_only_last_period() {
        let mut cache = PeriodicCache::new(CountingLoader::default(), 100, 0);
        frame(&mut cache, &[5, 6]);
        frame(&mut cache, &[5]);
        assert!(cache.contains(&6), "touched in the previous period");
        frame(&mut cache, &[5]);
        assert!(!cache.contains(&6));
        cache.clear(&mut ());
    }

    #[test]
    fn reappearing_key_is_not_reloaded() {
        let mut cache = PeriodicCache::new(CountingLoader::default(), 100, 2);
        frame(&mut cache, &[7]);
        frame(&mut cache, &[]);
        frame(&mut cache, &[7]);
        assert_eq!(cache.loader().loads, 1);
        cache.clear(&mut ());
    }

    #[test]
    fn entries_touched_this_period_are_pinned() {
        let mut cache = PeriodicCache::new(CountingLoader::default(), 20, 4);
        cache.period_start(&mut ());
        cache.get(&mut (), &10).expect("a");
        cache.get(&mut (), &10).expect("hit");
        let err = cache.get(&mut (), &11).expect_err("a is in use this period");
        assert!(matches!(err, RenderError::Capacity { .. }));
        cache.period_end();

        cache.period_start(&mut ());
        cache.get(&mut (), &11).expect("a was not touched yet, so it may go");
        assert!(!cache.contains(&10));
        cache.period_end();
        cache.clear(&mut ());
    }
}
