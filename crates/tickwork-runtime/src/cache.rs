//! Parsed-script cache
//!
//! Entries are keyed by script id and validated by content hash on every
//! lookup. A hash mismatch is a miss and drops the stale entry.

use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rustc_hash::FxHasher;
use tracing::{debug, trace};

/// Hash of a script's source text, as used for cache validation
pub fn content_hash(text: &str) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(text.as_bytes());
    hasher.write_usize(text.len());
    hasher.finish()
}

struct CacheEntry<A> {
    content_hash: u64,
    ast: Arc<A>,
    #[allow(dead_code)]
    created_at: Instant,
    /// Value of the access clock at the last hit or insert
    last_access: u64,
}

struct CacheInner<A> {
    entries: HashMap<String, CacheEntry<A>>,
    clock: u64,
}

impl<A> CacheInner<A> {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// LRU cache of parsed scripts
pub struct ScriptCache<A> {
    inner: Mutex<CacheInner<A>>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<A> ScriptCache<A> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                clock: 0,
            }),
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached AST for `script_id`, if it was parsed from text with `content_hash`
    pub fn get(&self, script_id: &str, content_hash: u64) -> Option<Arc<A>> {
        let mut inner = self.inner.lock();
        let now = inner.tick();

        let stale = match inner.entries.get_mut(script_id) {
            Some(entry) if entry.content_hash == content_hash => {
                entry.last_access = now;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.ast.clone());
            }
            Some(_) => true,
            None => false,
        };

        if stale {
            inner.entries.remove(script_id);
            debug!(target: "cache", "Evicted stale cache entry for {}", script_id);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a parsed script, evicting the least recently accessed entry when full
    pub fn put(&self, script_id: impl Into<String>, content_hash: u64, ast: A) -> Arc<A> {
        let script_id = script_id.into();
        let ast = Arc::new(ast);
        let mut inner = self.inner.lock();
        let now = inner.tick();

        if !inner.entries.contains_key(&script_id) && inner.entries.len() >= self.max_entries {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                inner.entries.remove(&oldest);
                trace!(target: "cache", "Evicted least recently used entry {}", oldest);
            }
        }

        inner.entries.insert(
            script_id,
            CacheEntry {
                content_hash,
                ast: ast.clone(),
                created_at: Instant::now(),
                last_access: now,
            },
        );
        ast
    }

    /// Drop the entry for `script_id`
    pub fn invalidate(&self, script_id: &str) -> bool {
        self.inner.lock().entries.remove(script_id).is_some()
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn contains(&self, script_id: &str) -> bool {
        self.inner.lock().entries.contains_key(script_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_requires_matching_hash() {
        let cache = ScriptCache::new(4);
        let hash_a = content_hash("say hello");
        let hash_b = content_hash("say goodbye");
        assert_ne!(hash_a, hash_b);

        cache.put("s", hash_a, "ast-a");
        assert_eq!(cache.get("s", hash_a).as_deref(), Some(&"ast-a"));

        // A different hash is a miss and evicts the stale entry
        assert!(cache.get("s", hash_b).is_none());
        assert!(cache.get("s", hash_a).is_none());
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 2);
    }

    #[test]
    fn test_evicts_least_recently_accessed() {
        let cache = ScriptCache::new(3);
        for id in ["a", "b", "c"] {
            cache.put(id, 1, id.to_string());
        }

        // Touch a and b so c becomes the oldest access
        cache.get("a", 1);
        cache.get("b", 1);

        cache.put("d", 1, "d".to_string());
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains("c"));
        assert!(cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("d"));
    }

    #[test]
    fn test_replacing_entry_does_not_evict() {
        let cache = ScriptCache::new(2);
        cache.put("a", 1, 1);
        cache.put("b", 1, 2);
        cache.put("a", 2, 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a", 2).as_deref(), Some(&3));
        assert_eq!(cache.get("b", 1).as_deref(), Some(&2));
    }

    #[test]
    fn test_invalidate() {
        let cache = ScriptCache::new(2);
        cache.put("a", 1, ());
        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        assert!(cache.is_empty());
    }
}
