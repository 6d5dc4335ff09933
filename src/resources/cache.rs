//! URL-keyed resource cache with budgeted eviction
//!
//! The cache is the only container shared between the render thread and the
//! data thread. The table itself is guarded by a mutex; individual
//! resources synchronise through their own atomics.

use crate::core::statistics::CacheStatistics;
use crate::resources::resource::{Resource, ResourceKind, ResourceState, Validity};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Content-addressed store mapping URL to a shared resource handle
pub struct ResourceCache {
    entries: Mutex<HashMap<String, Arc<Resource>>>,
    tick: AtomicU64,

    downloads_started: AtomicU64,
    downloads_completed: AtomicU64,
    downloads_failed: AtomicU64,
    retries_scheduled: AtomicU64,
    resources_evicted: AtomicU64,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            tick: AtomicU64::new(0),
            downloads_started: AtomicU64::new(0),
            downloads_completed: AtomicU64::new(0),
            downloads_failed: AtomicU64::new(0),
            retries_scheduled: AtomicU64::new(0),
            resources_evicted: AtomicU64::new(0),
        }
    }

    /// Current frame tick
    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }

    /// Start a new frame: advance the tick and forget last frame's
    /// priorities
    pub fn advance_frame(&self) -> u64 {
        let now = self.tick.fetch_add(1, Ordering::Relaxed) + 1;
        let entries = self.entries.lock().unwrap();
        for r in entries.values() {
            r.reset_priority();
        }
        now
    }

    /// Shared handle for `url`, inserting an `Initializing` resource on
    /// first sight; every caller gets the same handle
    pub fn get(&self, url: &str, kind: ResourceKind) -> Arc<Resource> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries.get(url) {
            debug_assert_eq!(existing.kind(), kind);
            return existing.clone();
        }
        let resource = Arc::new(Resource::new(url, kind));
        entries.insert(url.to_string(), resource.clone());
        resource
    }

    /// Look up without inserting
    pub fn peek(&self, url: &str) -> Option<Arc<Resource>> {
        self.entries.lock().unwrap().get(url).cloned()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.lock().unwrap().contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Mark the resource used this frame, shielding it from eviction
    pub fn touch(&self, resource: &Resource) {
        resource.touch(self.tick());
    }

    /// Readiness of a resource
    pub fn validity(&self, resource: &Resource) -> Validity {
        resource.validity()
    }

    /// Resources due for scheduling: `Initializing`, past their backoff,
    /// requested this frame, and not already queued
    pub(crate) fn collect_pending(&self) -> Vec<Arc<Resource>> {
        let now = self.tick();
        let entries = self.entries.lock().unwrap();
        entries
            .values()
            .filter(|r| {
                r.ready_for_fetch(now)
                    && r.last_access_tick() == now
                    && !r.queued.load(Ordering::Relaxed)
            })
            .cloned()
            .collect()
    }

    /// Reset every non-`Ready` resource to `Initializing`
    ///
    /// Used by view purges and configuration switches; `Ready` payloads stay
    /// so the next traversal does not start cold.
    pub fn purge_non_ready(&self) {
        let entries = self.entries.lock().unwrap();
        for r in entries.values() {
            if r.state() != ResourceState::Ready {
                r.purge();
            }
        }
    }

    pub fn total_ram(&self) -> usize {
        let entries = self.entries.lock().unwrap();
        entries.values().map(|r| r.ram_cost()).sum()
    }

    pub fn total_gpu(&self) -> usize {
        let entries = self.entries.lock().unwrap();
        entries.values().map(|r| r.gpu_cost()).sum()
    }

    /// End-of-frame eviction
    ///
    /// While either budget is exceeded, drops unpinned resources in
    /// ascending `(last_access_tick, -ram_cost)` order. A resource is
    /// pinned while any holder besides the cache keeps its handle (traverse
    /// nodes, in-flight fetches) or while it was touched this frame.
    pub fn eviction_pass(&self, max_ram: usize, max_gpu: usize) {
        let now = self.tick();
        let mut entries = self.entries.lock().unwrap();

        let mut ram: usize = entries.values().map(|r| r.ram_cost()).sum();
        let mut gpu: usize = entries.values().map(|r| r.gpu_cost()).sum();
        if ram <= max_ram && gpu <= max_gpu {
            return;
        }

        let mut victims: Vec<(u64, Reverse<usize>, String)> = entries
            .iter()
            .filter(|(_, r)| {
                Arc::strong_count(r) == 1
                    && r.last_access_tick() != now
                    && !matches!(
                        r.state(),
                        ResourceState::Downloading | ResourceState::Downloaded
                    )
            })
            .map(|(url, r)| (r.last_access_tick(), Reverse(r.ram_cost()), url.clone()))
            .collect();
        victims.sort();

        let mut evicted = 0u64;
        for (_, _, url) in victims {
            if ram <= max_ram && gpu <= max_gpu {
                break;
            }
            if let Some(r) = entries.remove(&url) {
                ram -= r.ram_cost();
                gpu -= r.gpu_cost();
                evicted += 1;
                log::trace!("evicted resource <{}>", r.url());
            }
        }
        if evicted > 0 {
            self.resources_evicted.fetch_add(evicted, Ordering::Relaxed);
            log::debug!("eviction pass dropped {evicted} resources");
        }
    }

    /// Snapshot of the cache counters
    pub fn statistics(&self) -> CacheStatistics {
        CacheStatistics {
            resources_total: self.len(),
            ram_used: self.total_ram(),
            gpu_used: self.total_gpu(),
            downloads_started: self.downloads_started.load(Ordering::Relaxed),
            downloads_completed: self.downloads_completed.load(Ordering::Relaxed),
            downloads_failed: self.downloads_failed.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            resources_evicted: self.resources_evicted.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn note_download_started(&self) {
        self.downloads_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_download_completed(&self) {
        self.downloads_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_download_failed(&self) {
        self.downloads_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_retry_scheduled(&self) {
        self.retries_scheduled.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::resource::ResourcePayload;

    fn publish_buffer(r: &Resource, bytes: usize) {
        r.mark_downloading();
        r.publish(
            ResourcePayload::RawBuffer(vec![0u8; bytes].into()),
            None,
            bytes,
            0,
        );
    }

    #[test]
    fn test_get_is_idempotent() {
        let cache = ResourceCache::new();
        let a = cache.get("u", ResourceKind::RawBuffer);
        let b = cache.get("u", ResourceKind::RawBuffer);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_touch_sets_current_tick() {
        let cache = ResourceCache::new();
        let r = cache.get("u", ResourceKind::RawBuffer);
        cache.advance_frame();
        cache.advance_frame();
        cache.touch(&r);
        assert_eq!(r.last_access_tick(), 2);
    }

    #[test]
    fn test_advance_frame_resets_priorities() {
        let cache = ResourceCache::new();
        let r = cache.get("u", ResourceKind::RawBuffer);
        r.update_priority(7.0);
        cache.advance_frame();
        assert!(r.priority().is_nan());
    }

    #[test]
    fn test_collect_pending_requires_current_access() {
        let cache = ResourceCache::new();
        let r = cache.get("u", ResourceKind::RawBuffer);
        cache.advance_frame();
        // not touched this frame: not pending
        assert!(cache.collect_pending().is_empty());
        cache.touch(&r);
        let pending = cache.collect_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].url(), "u");
    }

    #[test]
    fn test_collect_pending_skips_backoff() {
        let cache = ResourceCache::new();
        let r = cache.get("u", ResourceKind::RawBuffer);
        cache.advance_frame();
        cache.touch(&r);
        r.fail_transient(cache.tick(), 5);
        cache.touch(&r);
        assert!(cache.collect_pending().is_empty(), "backoff not elapsed");
    }

    #[test]
    fn test_eviction_order_oldest_first() {
        let cache = ResourceCache::new();
        let mb = 1024 * 1024;

        // texture A touched at tick 100, texture B at tick 101
        let a = cache.get("a", ResourceKind::RawBuffer);
        let b = cache.get("b", ResourceKind::RawBuffer);
        publish_buffer(&a, 10 * mb);
        publish_buffer(&b, 10 * mb);
        a.touch(100);
        b.touch(101);
        drop(a);
        drop(b);

        // frame 102: both stale, budget 12 MB
        while cache.tick() < 102 {
            cache.advance_frame();
        }
        cache.eviction_pass(12 * mb, usize::MAX);

        assert!(!cache.contains("a"), "older resource evicted");
        assert!(cache.contains("b"), "newer resource retained");
    }

    #[test]
    fn test_eviction_prefers_heavier_within_tick() {
        let cache = ResourceCache::new();
        let heavy = cache.get("heavy", ResourceKind::RawBuffer);
        let light = cache.get("light", ResourceKind::RawBuffer);
        publish_buffer(&heavy, 100);
        publish_buffer(&light, 10);
        heavy.touch(5);
        light.touch(5);
        drop(heavy);
        drop(light);

        while cache.tick() < 7 {
            cache.advance_frame();
        }
        cache.eviction_pass(50, usize::MAX);

        assert!(!cache.contains("heavy"));
        assert!(cache.contains("light"));
    }

    #[test]
    fn test_eviction_exempts_pinned_and_current() {
        let cache = ResourceCache::new();
        let pinned = cache.get("pinned", ResourceKind::RawBuffer);
        publish_buffer(&pinned, 100);

        let current = cache.get("current", ResourceKind::RawBuffer);
        publish_buffer(&current, 100);
        cache.advance_frame();
        cache.touch(&current);
        drop(current);

        // over budget, but one is held and the other was touched this tick
        cache.eviction_pass(10, usize::MAX);
        assert!(cache.contains("pinned"));
        assert!(cache.contains("current"));
        drop(pinned);
    }

    #[test]
    fn test_eviction_under_budget_is_noop() {
        let cache = ResourceCache::new();
        let r = cache.get("u", ResourceKind::RawBuffer);
        publish_buffer(&r, 100);
        drop(r);
        cache.advance_frame();
        cache.eviction_pass(1000, 1000);
        assert!(cache.contains("u"));
    }

    #[test]
    fn test_purge_non_ready() {
        let cache = ResourceCache::new();
        let ready = cache.get("ready", ResourceKind::RawBuffer);
        publish_buffer(&ready, 10);
        let downloading = cache.get("downloading", ResourceKind::RawBuffer);
        downloading.mark_downloading();

        cache.purge_non_ready();

        assert_eq!(ready.state(), ResourceState::Ready);
        assert_eq!(downloading.state(), ResourceState::Initializing);
    }

    #[test]
    fn test_statistics_snapshot() {
        let cache = ResourceCache::new();
        let r = cache.get("u", ResourceKind::RawBuffer);
        publish_buffer(&r, 42);
        cache.note_download_started();
        cache.note_download_completed();

        let stats = cache.statistics();
        assert_eq!(stats.resources_total, 1);
        assert_eq!(stats.ram_used, 42);
        assert_eq!(stats.downloads_started, 1);
        assert_eq!(stats.downloads_completed, 1);
    }
}
