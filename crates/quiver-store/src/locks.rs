//! Striped advisory locks serializing creates of the same `(name, owner)`.
//!
//! Keys are hashed to stripes; multi-key acquisition always locks stripes in
//! ascending index order, so two batches with overlapping names cannot
//! deadlock.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use parking_lot::{Mutex, MutexGuard};

pub(crate) const DEFAULT_STRIPES: usize = 64;

pub(crate) struct NameLocks {
    stripes: Vec<Mutex<()>>,
}

impl NameLocks {
    pub(crate) fn new(stripes: usize) -> Self {
        assert!(stripes > 0, "stripe count must be positive");
        Self {
            stripes: (0..stripes).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe_index(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.stripes.len()
    }

    pub(crate) fn lock(&self, key: &[u8]) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_index(key)].lock()
    }

    pub(crate) fn lock_many<'k>(&self, keys: impl IntoIterator<Item = &'k [u8]>) -> Vec<MutexGuard<'_, ()>> {
        let indices: BTreeSet<usize> = keys.into_iter().map(|k| self.stripe_index(k)).collect();
        indices.into_iter().map(|i| self.stripes[i].lock()).collect()
    }
}

impl Default for NameLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}
