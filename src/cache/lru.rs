use std::collections::HashMap;

use crate::cache::{close_logged, CacheLoader, CacheStats};
use crate::error::{RenderError, RenderResult};

pub(crate) struct Entry<V> {
    pub(crate) value: V,
    pub(crate) size: u64,
    pub(crate) last_used: u64,
    /// Period in which the entry was last touched; always 0 for a plain LRU.
    pub(crate) period: u64,
}

/// Capacity-bounded least-recently-used cache.
pub struct LruCache<L: CacheLoader> {
    loader: L,
    capacity: u64,
    entries: HashMap<L::Key, Entry<L::Value>>,
    tick: u64,
    stats: CacheStats,
}

impl<L: CacheLoader> LruCache<L> {
    pub fn new(loader: L, capacity: u64) -> Self {
        Self {
            loader,
            capacity,
            entries: HashMap::new(),
            tick: 0,
            stats: CacheStats::default(),
        }
    }

    /// Returns the cached value for `key`, loading it on a miss and evicting
    /// least-recently-used entries to make room.
    pub fn get(&mut self, ctx: &mut L::Context, key: &L::Key) -> RenderResult<&L::Value> {
        self.ensure_with(ctx, key, 0, &|_| true)?;
        self.lookup(key)
    }

    pub fn contains(&self, key: &L::Key) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn resident_bytes(&self) -> u64 {
        self.stats.resident_bytes
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn loader_mut(&mut self) -> &mut L {
        &mut self.loader
    }

    /// Closes and drops the entry for `key`. Returns whether one was resident.
    pub fn remove(&mut self, ctx: &mut L::Context, key: &L::Key) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.stats.resident_bytes -= entry.size;
                self.stats.resident_entries = self.entries.len();
                close_logged(&mut self.loader, ctx, key, entry.value, &mut self.stats);
                true
            }
            None => false,
        }
    }

    /// Closes every resident entry.
    pub fn clear(&mut self, ctx: &mut L::Context) {
        let entries: Vec<_> = self.entries.drain().collect();
        for (key, entry) in entries {
            close_logged(&mut self.loader, ctx, &key, entry.value, &mut self.stats);
        }
        self.stats.resident_bytes = 0;
        self.stats.resident_entries = 0;
    }

    pub(crate) fn lookup(&self, key: &L::Key) -> RenderResult<&L::Value> {
        self.entries
            .get(key)
            .map(|entry| &entry.value)
            .ok_or_else(|| RenderError::load(format!("{key:?}"), "entry is not resident"))
    }

    /// Makes `key` resident, stamping it with `period`. Only entries for
    /// which `evictable` holds may be evicted to make room.
    pub(crate) fn ensure_with(
        &mut self,
        ctx: &mut L::Context,
        key: &L::Key,
        period: u64,
        evictable: &dyn Fn(&Entry<L::Value>) -> bool,
    ) -> RenderResult<()> {
        self.tick += 1;
        let tick = self.tick;

        if let Some(entry) = self.entries.get_mut(key) {
            entry.last_used = tick;
            entry.period = period;
            self.stats.hits += 1;
            log::debug!("Cache hit for {:?}", key);
            return Ok(());
        }

        self.stats.misses += 1;
        let value = self.loader.load(ctx, key)?;
        let size = self.loader.size_of(key, &value);
        if size > self.capacity {
            close_logged(&mut self.loader, ctx, key, value, &mut self.stats);
            return Err(RenderError::Capacity {
                requested: size,
                capacity: self.capacity,
            });
        }

        while self.stats.resident_bytes + size > self.capacity {
            let Some(victim) = self.least_recent(evictable) else {
                let requested = self.stats.resident_bytes + size;
                close_logged(&mut self.loader, ctx, key, value, &mut self.stats);
                return Err(RenderError::Capacity {
                    requested,
                    capacity: self.capacity,
                });
            };
            self.evict(ctx, &victim);
        }

        log::debug!("Cache miss for {:?}, loaded {} bytes", key, size);
        self.entries.insert(
            key.clone(),
            Entry {
                value,
                size,
                last_used: tick,
                period,
            },
        );
        self.stats.resident_bytes += size;
        self.stats.resident_entries = self.entries.len();
        Ok(())
    }

    /// Evicts every entry matching `stale`.
    pub(crate) fn evict_where(
        &mut self,
        ctx: &mut L::Context,
        stale: &dyn Fn(&Entry<L::Value>) -> bool,
    ) -> usize {
        let victims: Vec<L::Key> = self
            .entries
            .iter()
            .filter(|(_, entry)| stale(entry))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &victims {
            self.evict(ctx, key);
        }
        victims.len()
    }

    fn least_recent(&self, evictable: &dyn Fn(&Entry<L::Value>) -> bool) -> Option<L::Key> {
        self.entries
            .iter()
            .filter(|(_, entry)| evictable(entry))
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone())
    }

    fn evict(&mut self, ctx: &mut L::Context, key: &L::Key) {
        if let Some(entry) = self.entries.remove(key) {
            log::debug!("Evicting {:?} ({} bytes)", key, entry.size);
            self.stats.resident_bytes -= entry.size;
            self.stats.resident_entries = self.entries.len();
            self.stats.evictions += 1;
            close_logged(&mut self.loader, ctx, key, entry.value, &mut self.stats);
        }
    }
}

impl<L: CacheLoader> Drop for LruCache<L> {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            log::warn!(
                "Cache dropped with {} resident entries that were never closed",
                self.entries.len()
            );
        }
    }
}
