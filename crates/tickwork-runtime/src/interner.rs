use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashSet;

/// Bounded string interner
///
/// Equal strings share one allocation until `capacity` distinct strings are
/// stored. Past that, `intern` stops storing and hands back a fresh copy.
pub struct StringInterner {
    strings: RwLock<FxHashSet<Arc<str>>>,
    capacity: usize,
}

impl StringInterner {
    pub fn new(capacity: usize) -> Self {
        Self {
            strings: RwLock::new(FxHashSet::default()),
            capacity,
        }
    }

    pub fn intern(&self, s: &str) -> Arc<str> {
        if let Some(existing) = self.strings.read().get(s) {
            return existing.clone();
        }

        let mut strings = self.strings.write();
        if let Some(existing) = strings.get(s) {
            return existing.clone();
        }
        if strings.len() >= self.capacity {
            return Arc::from(s);
        }

        let interned: Arc<str> = Arc::from(s);
        strings.insert(interned.clone());
        interned
    }

    pub fn contains(&self, s: &str) -> bool {
        self.strings.read().contains(s)
    }

    pub fn len(&self) -> usize {
        self.strings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_strings_share_storage() {
        let interner = StringInterner::new(8);
        let a = interner.intern("zombie");
        let b = interner.intern(&String::from("zombie"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn test_full_interner_passes_through() {
        let interner = StringInterner::new(1);
        interner.intern("first");

        let a = interner.intern("second");
        let b = interner.intern("second");
        assert_eq!(&*a, "second");
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!interner.contains("second"));
        assert_eq!(interner.len(), 1);

        // Already-interned strings are still canonical
        assert!(Arc::ptr_eq(&interner.intern("first"), &interner.intern("first")));
    }
}
