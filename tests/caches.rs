use std::collections::HashMap;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use render_kernel::cache::{CacheLoader, LruCache};
use render_kernel::gpu::{
    Area, Capabilities, FilterMode, FramebufferDescription, RecordingBackend, TextureFormat,
};
use render_kernel::renderer::targets::FramebufferLoader;
use render_kernel::renderer::FramebufferCache;
use render_kernel::{RenderError, RenderResult};

const MIB: u64 = 1024 * 1024;

#[test]
fn returned_framebuffer_is_reused_for_an_equal_description() {
    let mut backend = RecordingBackend::new(Capabilities::default());
    let mut cache = FramebufferCache::new(FramebufferLoader, 64 * MIB);
    let description =
        FramebufferDescription::color(Area::square(256), TextureFormat::Rgba8, FilterMode::Linear);

    let first_id = {
        let receipt = cache
            .borrow(&mut backend, &description)
            .expect("first borrow");
        assert_eq!(cache.outstanding(), 1);
        receipt.id
    };
    assert_eq!(cache.outstanding(), 0);
    assert_eq!(backend.framebuffer_creations(), 1);

    let receipt = cache
        .borrow(&mut backend, &description)
        .expect("second borrow");
    assert_eq!(receipt.id, first_id);
    assert_eq!(backend.framebuffer_creations(), 1, "no second load");
    assert_eq!(cache.stats().hits, 1);
    assert_eq!(cache.stats().misses, 1);

    // Two live borrows of one description need two framebuffers.
    let other = cache
        .borrow(&mut backend, &description)
        .expect("concurrent borrow");
    assert_ne!(other.id, receipt.id);
    assert_eq!(backend.framebuffer_creations(), 2);
}

#[test]
fn outstanding_receipts_block_teardown() {
    let mut backend = RecordingBackend::new(Capabilities::default());
    let mut cache = FramebufferCache::new(FramebufferLoader, 64 * MIB);
    let description =
        FramebufferDescription::color(Area::square(64), TextureFormat::Rgba8, FilterMode::Nearest);

    let receipt = cache
        .borrow(&mut backend, &description)
        .expect("borrow");
    assert!(matches!(
        cache.check_returned(),
        Err(RenderError::ReceiptLeak { outstanding: 1 })
    ));
    drop(receipt);
    cache.check_returned().expect("all returned");
    cache.clear(&mut backend).expect("clear");
    assert_eq!(backend.live_framebuffers(), 0);
}

/// Values sized by their key; records which keys are resident.
#[derive(Default)]
struct SizedLoader {
    resident: HashMap<u32, u64>,
    loads: usize,
}

impl CacheLoader for SizedLoader {
    type Key = u32;
    type Value = u64;
    type Context = ();

    fn load(&mut self, _: &mut (), key: &u32) -> RenderResult<u64> {
        self.loads += 1;
        let size = u64::from(*key % 7 + 1);
        self.resident.insert(*key, size);
        Ok(size)
    }

    fn close(&mut self, _: &mut (), key: &u32, _: u64) -> RenderResult<()> {
        self.resident.remove(key);
        Ok(())
    }

    fn size_of(&self, _: &u32, value: &u64) -> u64 {
        *value
    }
}

#[test]
fn random_access_never_exceeds_capacity() {
    const CAPACITY: u64 = 20;
    let mut rng = SmallRng::seed_from_u64(0x5eed);
    let mut cache = LruCache::new(SizedLoader::default(), CAPACITY);

    for _ in 0..2_000 {
        let key = rng.gen_range(0..32);
        let value = *cache.get(&mut (), &key).expect("every entry fits");
        assert_eq!(value, u64::from(key % 7 + 1));
        assert!(cache.resident_bytes() <= CAPACITY);

        let loader = cache.loader();
        assert_eq!(loader.resident.len(), cache.len());
        assert_eq!(
            loader.resident.values().sum::<u64>(),
            cache.resident_bytes()
        );
    }

    let stats = cache.stats();
    assert_eq!(stats.misses as usize, cache.loader().loads);
    assert_eq!(stats.hits + stats.misses, 2_000);
    assert!(stats.evictions > 0);
}

#[test]
fn most_recent_entry_survives_eviction() {
    let mut cache = LruCache::new(SizedLoader::default(), 6);
    // Keys 2, 3 and 4 cost 3, 4 and 5 bytes.
    cache.get(&mut (), &2).expect("load 2");
    cache.get(&mut (), &3).expect("load 3");
    assert!(!cache.contains(&2), "2 was least recently used");

    cache.get(&mut (), &4).expect("load 4");
    assert!(cache.contains(&4));
    assert!(!cache.contains(&3));
}

#[test]
fn entry_larger_than_the_cache_is_rejected() {
    let mut cache = LruCache::new(SizedLoader::default(), 4);
    let err = cache.get(&mut (), &6).unwrap_err();
    assert!(matches!(
        err,
        RenderError::Capacity {
            requested: 7,
            capacity: 4
        }
    ));
    assert!(cache.is_empty());
    assert!(cache.loader().resident.is_empty(), "rejected value is closed");
}
