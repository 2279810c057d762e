//! Fuzz cache blob deserialization: a malformed stored entry must be
//! discarded as a miss, never panic the cache.
#![no_main]
use flagcore_cache::{Cache, CacheConfig, InMemoryStorage, Storage};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let blob = String::from_utf8_lossy(data);
    let storage = InMemoryStorage::new();
    if storage.store_raw(&blob).is_ok() {
        let cache = Cache::new(storage, CacheConfig::default());
        let _ = cache.get("fuzz-key", chrono::Utc::now());
    }
});
