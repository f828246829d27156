use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Types that can be returned to a pool and handed out again
///
/// `reset` must leave the value indistinguishable from a freshly built one.
pub trait Reusable {
    fn reset(&mut self);
}

impl Reusable for String {
    fn reset(&mut self) {
        self.clear();
    }
}

impl<T> Reusable for Vec<T> {
    fn reset(&mut self) {
        self.clear();
    }
}

/// A bounded pool of reusable values
///
/// The pool only saves allocations: callers must not rely on getting back
/// any particular instance.
pub struct ObjectPool<T> {
    idle: Mutex<Vec<T>>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    max_pooled: usize,
    created: AtomicU64,
    reused: AtomicU64,
}

impl<T: Reusable> ObjectPool<T> {
    pub fn new<F>(max_pooled: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            idle: Mutex::new(Vec::with_capacity(max_pooled.min(64))),
            factory: Box::new(factory),
            max_pooled,
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
        }
    }

    /// Take an idle value, or build a new one if none is available
    pub fn borrow(&self) -> T {
        if let Some(obj) = self.idle.lock().pop() {
            self.reused.fetch_add(1, Ordering::Relaxed);
            return obj;
        }
        self.created.fetch_add(1, Ordering::Relaxed);
        (self.factory)()
    }

    /// Reset `obj` and keep it for reuse, unless the pool is full
    pub fn release(&self, mut obj: T) {
        let mut idle = self.idle.lock();
        if idle.len() >= self.max_pooled {
            return;
        }
        obj.reset();
        idle.push(obj);
    }

    /// Idle values ready to be borrowed
    pub fn available(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn reused_count(&self) -> u64 {
        self.reused.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_borrow_builds_when_empty() {
        let pool = ObjectPool::new(2, || String::from("fresh"));
        assert_eq!(pool.borrow(), "fresh");
        assert_eq!(pool.created_count(), 1);
        assert_eq!(pool.reused_count(), 0);
    }

    #[test]
    fn test_release_resets_and_reuses() {
        let pool = ObjectPool::new(2, String::new);
        let mut s = pool.borrow();
        s.push_str("dirty");
        pool.release(s);

        assert_eq!(pool.available(), 1);
        assert_eq!(pool.borrow(), "");
        assert_eq!(pool.reused_count(), 1);
    }

    #[test]
    fn test_release_beyond_max_drops() {
        let pool = ObjectPool::new(1, Vec::<u8>::new);
        pool.release(vec![1]);
        pool.release(vec![2]);
        assert_eq!(pool.available(), 1);
    }
}
