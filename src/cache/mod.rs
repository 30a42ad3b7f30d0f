//! Caches for GPU-backed objects that are expensive to create.
//!
//! Three disciplines share one [`CacheLoader`]:
//!
//! * [`LruCache`] for immutable objects such as compiled programs,
//! * [`BorrowCache`] for scratch objects that are lent out through a
//!   [`Receipt`] and pooled again when the receipt is dropped,
//! * [`PeriodicCache`] for objects valid for one frame (shadow maps).

mod borrow;
mod lru;
mod periodic;

pub use borrow::{BorrowCache, Receipt};
pub use lru::LruCache;
pub use periodic::PeriodicCache;

use std::fmt::Debug;
use std::hash::Hash;

use crate::error::RenderResult;

/// Creates and releases the values held by a cache.
///
/// `Context` is whatever the loader needs to touch (usually the GPU backend);
/// the cache only threads it through.
pub trait CacheLoader {
    type Key: Clone + Eq + Hash + Debug;
    type Value;
    type Context: ?Sized;

    fn load(&mut self, ctx: &mut Self::Context, key: &Self::Key) -> RenderResult<Self::Value>;

    /// Releases the resource behind `value`. Called on eviction and teardown;
    /// a failure is logged by the cache and never retried.
    fn close(
        &mut self,
        ctx: &mut Self::Context,
        key: &Self::Key,
        value: Self::Value,
    ) -> RenderResult<()>;

    /// Bytes charged against the cache capacity for `value`.
    fn size_of(&self, key: &Self::Key, value: &Self::Value) -> u64;
}

/// Hit/miss counters and residency, updated on every cache access.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Loader `close` calls that failed.
    pub close_failures: u64,
    pub resident_bytes: u64,
    pub resident_entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f32 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f32 / total as f32
        }
    }
}

/// Closes `value`, logging instead of propagating a failure.
pub(crate) fn close_logged<L: CacheLoader>(
    loader: &mut L,
    ctx: &mut L::Context,
    key: &L::Key,
    value: L::Value,
    stats: &mut CacheStats,
) {
    if let Err(err) = loader.close(ctx, key, value) {
        stats.close_failures += 1;
        log::error!("Failed to release cached {:?}: {}", key, err);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::RenderError;

    /// Loader over plain integers whose size is the key itself.
    #[derive(Default)]
    pub(crate) struct CountingLoader {
        pub(crate) next: u32,
        pub(crate) loads: usize,
        pub(crate) closed: Vec<(u64, u32)>,
        pub(crate) fail_loads: bool,
        pub(crate) fail_closes: bool,
    }

    impl CacheLoader for CountingLoader {
        type Key = u64;
        type Value = u32;
        type Context = ();

        fn load(&mut self, _ctx: &mut (), key: &u64) -> RenderResult<u32> {
            if self.fail_loads {
                return Err(RenderError::load(format!("value {key}"), "injected"));
            }
            self.loads += 1;
            self.next += 1;
            Ok(self.next)
        }

        fn close(&mut self, _ctx: &mut (), key: &u64, value: u32) -> RenderResult<()> {
            self.closed.push((*key, value));
            if self.fail_closes {
                return Err(RenderError::load(format!("value {key}"), "injected close"));
            }
            Ok(())
        }

        fn size_of(&self, key: &u64, _value: &u32) -> u64 {
            *key
        }
    }
}
