//! Rendered-cell cache: bounded, time-limited, thread-safe.
//!
//! Maps a compiled-cell fingerprint to a ready-to-display cell. Hits return
//! defensive copies, so callers can never mutate cached content. The cache
//! has no side effect beyond its own memory: it is safe to flush at any
//! point and correctness only ever degrades to recompilation.

use crate::panel::{PanelId, RenderedCell, TemplateId, ViewerId};
use lru::LruCache;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default cache capacity (entries).
pub const DEFAULT_CAPACITY: usize = 4096;
/// Default entry time-to-live.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Fingerprint of a compiled cell.
///
/// Equal keys are interchangeable. Non-cacheable templates never produce
/// one: the compiler skips this type entirely for them. The viewer is
/// deliberately not part of the key: two viewers with identical
/// substitution inputs share a compiled cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Owning panel.
    pub panel: PanelId,
    /// Source template.
    pub template: TemplateId,
    /// Stable hash of the substitution values the template references.
    pub context_hash: u64,
}

/// Counter snapshot exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that invoked the loader.
    pub misses: u64,
    /// Entries dropped by capacity pressure or TTL expiry.
    pub evictions: u64,
    /// Current entry count.
    pub len: usize,
}

struct Entry {
    cell: RenderedCell,
    stored_at: Instant,
    viewer: ViewerId,
}

struct Inner {
    entries: LruCache<CacheKey, Entry>,
    /// Keys each viewer's compilations produced, for viewer-scoped
    /// invalidation. Keys are shared across viewers; the index remembers
    /// the viewer that stored the entry.
    by_viewer: HashMap<ViewerId, HashSet<CacheKey>>,
}

/// Bounded, time-limited cache of rendered cells. Safe from any thread.
pub struct CellCache {
    inner: Mutex<Inner>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CellCache {
    /// Create a cache with the given capacity and TTL.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                by_viewer: HashMap::new(),
            }),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up `key`, invoking `loader` on a miss.
    ///
    /// A hit returns a copy without invoking the loader. A miss (absent or
    /// TTL-expired) invokes the loader, stores a copy attributed to
    /// `viewer`, and returns the loaded value.
    pub fn get_or_insert_with(
        &self,
        key: &CacheKey,
        viewer: ViewerId,
        loader: impl FnOnce() -> RenderedCell,
    ) -> RenderedCell {
        {
            let mut inner = self.lock();
            match inner.entries.get(key) {
                Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return entry.cell.clone();
                }
                Some(_) => {
                    // Expired: TTL is fixed and independent of pressure.
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    Self::remove_entry(&mut inner, key);
                }
                None => {}
            }
        }

        // Loader runs outside the lock; it may hop threads or take time.
        self.misses.fetch_add(1, Ordering::Relaxed);
        let cell = loader();

        let mut inner = self.lock();
        inner
            .by_viewer
            .entry(viewer)
            .or_default()
            .insert(key.clone());
        let evicted = inner.entries.push(
            key.clone(),
            Entry {
                cell: cell.clone(),
                stored_at: Instant::now(),
                viewer,
            },
        );
        if let Some((old_key, old_entry)) = evicted {
            if old_key != *key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                if let Some(keys) = inner.by_viewer.get_mut(&old_entry.viewer) {
                    keys.remove(&old_key);
                }
            }
        }
        cell
    }

    /// Remove one key.
    pub fn invalidate(&self, key: &CacheKey) {
        let mut inner = self.lock();
        Self::remove_entry(&mut inner, key);
    }

    /// Remove every entry belonging to a panel.
    pub fn invalidate_panel(&self, panel: &PanelId) {
        self.invalidate_matching(|key| key.panel == *panel);
    }

    /// Remove every entry for one template within a panel.
    pub fn invalidate_template(&self, panel: &PanelId, template: &TemplateId) {
        self.invalidate_matching(|key| key.panel == *panel && key.template == *template);
    }

    /// Remove every entry stored by a viewer's compilations.
    pub fn invalidate_viewer(&self, viewer: ViewerId) {
        let mut inner = self.lock();
        if let Some(keys) = inner.by_viewer.remove(&viewer) {
            for key in keys {
                inner.entries.pop(&key);
            }
        }
    }

    /// Drop everything.
    pub fn flush(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.by_viewer.clear();
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            len: self.lock().entries.len(),
        }
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn invalidate_matching(&self, predicate: impl Fn(&CacheKey) -> bool) {
        let mut inner = self.lock();
        let doomed: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in doomed {
            Self::remove_entry(&mut inner, &key);
        }
    }

    fn remove_entry(inner: &mut Inner, key: &CacheKey) {
        if let Some(entry) = inner.entries.pop(key) {
            if let Some(keys) = inner.by_viewer.get_mut(&entry.viewer) {
                keys.remove(key);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned cache mutex means a loader panicked mid-insert; the
        // map is still structurally sound, so keep serving.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for CellCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(panel: &str, template: &str, hash: u64) -> CacheKey {
        CacheKey {
            panel: PanelId::new(panel),
            template: TemplateId::new(template),
            context_hash: hash,
        }
    }

    #[test]
    fn test_hit_skips_loader() {
        let cache = CellCache::default();
        let k = key("shop", "gem", 1);
        let v1 = ViewerId(1);
        cache.get_or_insert_with(&k, v1, || RenderedCell::new("gem"));
        let cell = cache.get_or_insert_with(&k, v1, || panic!("loader must not run on a hit"));
        assert_eq!(cell.visual(), "gem");
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_hit_returns_defensive_copy() {
        let cache = CellCache::default();
        let k = key("shop", "gem", 1);
        let a = cache.get_or_insert_with(&k, ViewerId(1), || RenderedCell::new("gem"));
        let b = cache.get_or_insert_with(&k, ViewerId(1), || unreachable!());
        assert_eq!(a, b);
    }

    #[test]
    fn test_ttl_expiry_counts_as_eviction() {
        let cache = CellCache::new(16, Duration::ZERO);
        let k = key("shop", "gem", 1);
        cache.get_or_insert_with(&k, ViewerId(1), || RenderedCell::new("gem"));
        cache.get_or_insert_with(&k, ViewerId(1), || RenderedCell::new("gem"));
        let stats = cache.stats();
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.evictions, 1);
    }

    #[test]
    fn test_capacity_eviction() {
        let cache = CellCache::new(2, DEFAULT_TTL);
        for i in 0..3 {
            cache.get_or_insert_with(&key("p", "t", i), ViewerId(1), || RenderedCell::new("x"));
        }
        let stats = cache.stats();
        assert_eq!(stats.len, 2);
        assert_eq!(stats.evictions, 1);
    }

    #[test]
    fn test_point_invalidation() {
        let cache = CellCache::default();
        let k = key("shop", "gem", 1);
        cache.get_or_insert_with(&k, ViewerId(1), || RenderedCell::new("gem"));
        cache.invalidate(&k);
        cache.get_or_insert_with(&k, ViewerId(1), || RenderedCell::new("gem"));
        assert_eq!(cache.stats().misses, 2);
    }

    #[test]
    fn test_panel_scoped_invalidation() {
        let cache = CellCache::default();
        cache.get_or_insert_with(&key("a", "t", 1), ViewerId(1), || RenderedCell::new("x"));
        cache.get_or_insert_with(&key("a", "u", 2), ViewerId(1), || RenderedCell::new("y"));
        cache.get_or_insert_with(&key("b", "t", 3), ViewerId(1), || RenderedCell::new("z"));
        cache.invalidate_panel(&PanelId::new("a"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_template_scoped_invalidation() {
        let cache = CellCache::default();
        cache.get_or_insert_with(&key("a", "t", 1), ViewerId(1), || RenderedCell::new("x"));
        cache.get_or_insert_with(&key("a", "t", 2), ViewerId(1), || RenderedCell::new("x"));
        cache.get_or_insert_with(&key("a", "u", 3), ViewerId(1), || RenderedCell::new("y"));
        cache.invalidate_template(&PanelId::new("a"), &TemplateId::new("t"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_viewer_scoped_invalidation() {
        let cache = CellCache::default();
        cache.get_or_insert_with(&key("a", "t", 1), ViewerId(1), || RenderedCell::new("x"));
        cache.get_or_insert_with(&key("a", "u", 2), ViewerId(2), || RenderedCell::new("y"));
        cache.invalidate_viewer(ViewerId(1));
        assert_eq!(cache.len(), 1);
        // Viewer 2's entry survives.
        cache.get_or_insert_with(&key("a", "u", 2), ViewerId(2), || unreachable!());
    }

    #[test]
    fn test_flush_drops_everything() {
        let cache = CellCache::default();
        cache.get_or_insert_with(&key("a", "t", 1), ViewerId(1), || RenderedCell::new("x"));
        cache.flush();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_is_shareable_across_threads() {
        use std::sync::Arc;
        let cache = Arc::new(CellCache::default());
        let mut handles = Vec::new();
        for t in 0..4u64 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    let k = key("p", "t", i % 8);
                    cache.get_or_insert_with(&k, ViewerId(t), || RenderedCell::new("x"));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        let stats = cache.stats();
        assert_eq!(stats.hits + stats.misses, 200);
    }
}
