use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::ops::Deref;
use std::rc::Rc;

use crate::cache::{close_logged, CacheLoader, CacheStats};
use crate::error::{RenderError, RenderResult};

struct Pooled<V> {
    value: V,
    size: u64,
    last_used: u64,
}

/// State shared between a cache and its outstanding receipts.
struct Pool<K, V> {
    free: HashMap<K, Vec<Pooled<V>>>,
    outstanding: usize,
    lent_bytes: u64,
    free_bytes: u64,
    tick: u64,
}

impl<K: Eq + Hash, V> Pool<K, V> {
    fn give_back(&mut self, key: K, value: V, size: u64) {
        self.tick += 1;
        self.outstanding -= 1;
        self.lent_bytes -= size;
        self.free_bytes += size;
        self.free.entry(key).or_default().push(Pooled {
            value,
            size,
            last_used: self.tick,
        });
    }

    fn free_count(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }
}

/// Exclusive loan of a pooled value. Dropping the receipt returns the value
/// to its cache, after which it cannot be read.
pub struct Receipt<K: Eq + Hash, V> {
    loan: Option<(K, V)>,
    size: u64,
    pool: Rc<RefCell<Pool<K, V>>>,
}

impl<K: Eq + Hash, V> Receipt<K, V> {
    pub fn key(&self) -> &K {
        match &self.loan {
            Some((key, _)) => key,
            None => unreachable!("loan is only taken on drop"),
        }
    }

    /// Returns the value to the pool; equivalent to dropping the receipt.
    pub fn give_back(self) {}
}

impl<K: Eq + Hash, V> Deref for Receipt<K, V> {
    type Target = V;

    fn deref(&self) -> &V {
        match &self.loan {
            Some((_, value)) => value,
            None => unreachable!("loan is only taken on drop"),
        }
    }
}

impl<K: Eq + Hash + fmt::Debug, V: fmt::Debug> fmt::Debug for Receipt<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receipt")
            .field("loan", &self.loan)
            .field("size", &self.size)
            .finish()
    }
}

impl<K: Eq + Hash, V> Drop for Receipt<K, V> {
    fn drop(&mut self) {
        if let Some((key, value)) = self.loan.take() {
            self.pool.borrow_mut().give_back(key, value, self.size);
        }
    }
}

/// Pool of interchangeable scratch values lent out one receipt at a time.
///
/// Values are matched structurally by key: a free value whose key equals the
/// requested one is reused before anything new is loaded. Only free values
/// are ever evicted, so a lent value cannot be closed under its borrower.
pub struct BorrowCache<L: CacheLoader> {
    loader: L,
    capacity: u64,
    pool: Rc<RefCell<Pool<L::Key, L::Value>>>,
    stats: CacheStats,
}

impl<L: CacheLoader> BorrowCache<L> {
    pub fn new(loader: L, capacity: u64) -> Self {
        Self {
            loader,
            capacity,
            pool: Rc::new(RefCell::new(Pool {
                free: HashMap::new(),
                outstanding: 0,
                lent_bytes: 0,
                free_bytes: 0,
                tick: 0,
            })),
            stats: CacheStats::default(),
        }
    }

    /// Lends a value matching `key`, reusing a free one when possible.
    pub fn borrow(
        &mut self,
        ctx: &mut L::Context,
        key: &L::Key,
    ) -> RenderResult<Receipt<L::Key, L::Value>> {
        let reused = {
            let mut pool = self.pool.borrow_mut();
            let taken = pool.free.get_mut(key).and_then(Vec::pop);
            if let Some(pooled) = &taken {
                pool.free_bytes -= pooled.size;
                pool.lent_bytes += pooled.size;
                pool.outstanding += 1;
            }
            taken
        };
        if let Some(pooled) = reused {
            self.stats.hits += 1;
            log::debug!("Reusing pooled {:?}", key);
            return Ok(self.receipt(key.clone(), pooled.value, pooled.size));
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

        while self.resident_bytes() + size > self.capacity {
            if !self.evict_least_recent(ctx) {
                let requested = self.resident_bytes() + size;
                close_logged(&mut self.loader, ctx, key, value, &mut self.stats);
                return Err(RenderError::Capacity {
                    requested,
                    capacity: self.capacity,
                });
            }
        }

        log::debug!("Loaded scratch {:?} ({} bytes)", key, size);
        {
            let mut pool = self.pool.borrow_mut();
            pool.outstanding += 1;
            pool.lent_bytes += size;
        }
        Ok(self.receipt(key.clone(), value, size))
    }

    /// Number of receipts not yet returned.
    pub fn outstanding(&self) -> usize {
        self.pool.borrow().outstanding
    }

    /// Fails with [`RenderError::ReceiptLeak`] while any receipt is out.
    pub fn check_returned(&self) -> RenderResult<()> {
        match self.outstanding() {
            0 => Ok(()),
            outstanding => Err(RenderError::ReceiptLeak { outstanding }),
        }
    }

    pub fn free_count(&self) -> usize {
        self.pool.borrow().free_count()
    }

    pub fn resident_bytes(&self) -> u64 {
        let pool = self.pool.borrow();
        pool.free_bytes + pool.lent_bytes
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        let pool = self.pool.borrow();
        CacheStats {
            resident_bytes: pool.free_bytes + pool.lent_bytes,
            resident_entries: pool.free_count() + pool.outstanding,
            ..self.stats
        }
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Closes every free value. Fails with [`RenderError::ReceiptLeak`] if
    /// receipts are still outstanding; free values are closed either way.
    pub fn clear(&mut self, ctx: &mut L::Context) -> RenderResult<()> {
        let free: Vec<(L::Key, Vec<Pooled<L::Value>>)> = {
            let mut pool = self.pool.borrow_mut();
            pool.free_bytes = 0;
            pool.free.drain().collect()
        };
        for (key, values) in free {
            for pooled in values {
                close_logged(&mut self.loader, ctx, &key, pooled.value, &mut self.stats);
            }
        }
        self.check_returned()
    }

    fn receipt(&self, key: L::Key, value: L::Value, size: u64) -> Receipt<L::Key, L::Value> {
        Receipt {
            loan: Some((key, value)),
            size,
            pool: Rc::clone(&self.pool),
        }
    }

    fn evict_least_recent(&mut self, ctx: &mut L::Context) -> bool {
        let victim = {
            let mut pool = self.pool.borrow_mut();
            let oldest = pool
                .free
                .iter()
                .flat_map(|(key, values)| {
                    values
                        .iter()
                        .enumerate()
                        .map(move |(i, pooled)| (key, i, pooled.last_used))
                })
                .min_by_key(|(_, _, last_used)| *last_used)
                .map(|(key, i, _)| (key.clone(), i));
            let Some((key, index)) = oldest else {
                return false;
            };
            let Some(values) = pool.free.get_mut(&key) else {
                return false;
            };
            let pooled = values.swap_remove(index);
            if values.is_empty() {
                pool.free.remove(&key);
            }
            pool.free_bytes -= pooled.size;
            (key, pooled)
        };
        let (key, pooled) = victim;
        log::debug!("Evicting pooled {:?} ({} bytes)", key, pooled.size);
        self.stats.evictions += 1;
        close_logged(&mut self.loader, ctx, &key, pooled.value, &mut self.stats);
        true
    }
}

impl<L: CacheLoader> Drop for BorrowCache<L> {
    fn drop(&mut self) {
        let pool = self.pool.borrow();
        if pool.outstanding > 0 || pool.free_count() > 0 {
            log::warn!(
                "Borrow cache dropped with {} free and {} lent values never closed",
                pool.free_count(),
                pool.outstanding
            );
        }
    }
}
