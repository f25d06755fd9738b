use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::traits::{BatchOp, KvBackend, Region, ScanVisitor, WriteBatch};

type RegionMap = BTreeMap<Vec<u8>, Vec<u8>>;

/// In-memory, BTreeMap-based backend.
///
/// Intended for tests and embedding. All three regions sit behind one
/// `RwLock`, so a scan holds a consistent snapshot and a commit is atomic
/// with respect to every reader.
pub struct InMemoryBackend {
    regions: RwLock<[RegionMap; 3]>,
}

impl InMemoryBackend {
    /// Create a new empty backend.
    pub fn new() -> Self {
        Self {
            regions: RwLock::new(Default::default()),
        }
    }

    /// Total bytes of values across all regions.
    pub fn total_bytes(&self) -> u64 {
        self.regions
            .read()
            .expect("lock poisoned")
            .iter()
            .flat_map(|m| m.values())
            .map(|v| v.len() as u64)
            .sum()
    }

    /// Remove everything from every region.
    pub fn clear(&self) {
        let mut regions = self.regions.write().expect("lock poisoned");
        for map in regions.iter_mut() {
            map.clear();
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies `op`, returning the previous value for the undo log.
fn apply(regions: &mut [RegionMap; 3], op: BatchOp) -> StoreResult<(Region, Vec<u8>, Option<Vec<u8>>)> {
    match op {
        BatchOp::Put { region, key, value } => {
            let prev = regions[region.index()].insert(key.clone(), value);
            Ok((region, key, prev))
        }
        BatchOp::PutNew { region, key, value } => {
            let map = &mut regions[region.index()];
            if map.contains_key(&key) {
                return Err(StoreError::KeyExists {
                    region,
                    key: String::from_utf8_lossy(&key).into_owned(),
                });
            }
            map.insert(key.clone(), value);
            Ok((region, key, None))
        }
        BatchOp::Delete { region, key } => {
            let prev = regions[region.index()].remove(&key);
            Ok((region, key, prev))
        }
    }
}

impl KvBackend for InMemoryBackend {
    fn get(&self, region: Region, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let regions = self.regions.read().expect("lock poisoned");
        Ok(regions[region.index()].get(key).cloned())
    }

    fn read_with(
        &self,
        region: Region,
        key: &[u8],
        visit: &mut dyn FnMut(&[u8]) -> StoreResult<()>,
    ) -> StoreResult<bool> {
        let regions = self.regions.read().expect("lock poisoned");
        match regions[region.index()].get(key) {
            Some(value) => {
                visit(value)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn scan(&self, region: Region, visit: &mut ScanVisitor<'_>) -> StoreResult<()> {
        let regions = self.regions.read().expect("lock poisoned");
        for (key, value) in &regions[region.index()] {
            visit(key, value)?;
        }
        Ok(())
    }

    fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut regions = self.regions.write().expect("lock poisoned");
        let mut undo = Vec::with_capacity(batch.len());
        for op in batch.into_ops() {
            match apply(&mut regions, op) {
                Ok(entry) => undo.push(entry),
                Err(e) => {
                    // Roll back in reverse so overlapping keys end up as before.
                    for (region, key, prev) in undo.into_iter().rev() {
                        let map = &mut regions[region.index()];
                        match prev {
                            Some(value) => map.insert(key, value),
                            None => map.remove(&key),
                        };
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn flush(&self) -> StoreResult<()> {
        Ok(())
    }

    fn len(&self, region: Region) -> StoreResult<usize> {
        Ok(self.regions.read().expect("lock poisoned")[region.index()].len())
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let regions = self.regions.read().expect("lock poisoned");
        f.debug_struct("InMemoryBackend")
            .field("payload_count", &regions[0].len())
            .field("name_count", &regions[1].len())
            .field("meta_count", &regions[2].len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_and_get() {
        let backend = InMemoryBackend::new();
        backend
            .commit(WriteBatch::new().put(Region::Payload, "k", "v"))
            .unwrap();
        assert_eq!(backend.get(Region::Payload, b"k").unwrap(), Some(b"v".to_vec()));
        // Regions are independent key spaces.
        assert_eq!(backend.get(Region::Meta, b"k").unwrap(), None);
    }

    #[test]
    fn put_new_conflict_rolls_back_whole_batch() {
        let backend = InMemoryBackend::new();
        backend
            .commit(WriteBatch::new().put(Region::Name, "taken", "a"))
            .unwrap();

        let err = backend
            .commit(
                WriteBatch::new()
                    .put(Region::Payload, "p", "data")
                    .delete(Region::Name, "taken")
                    .put(Region::Name, "taken", "b")
                    .put_new(Region::Name, "taken", "c"),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::KeyExists { region: Region::Name, .. }));
        assert_eq!(backend.get(Region::Payload, b"p").unwrap(), None);
        assert_eq!(backend.get(Region::Name, b"taken").unwrap(), Some(b"a".to_vec()));
    }

    #[test]
    fn delete_missing_key_is_noop() {
        let backend = InMemoryBackend::new();
        backend
            .commit(WriteBatch::new().delete(Region::Meta, "ghost"))
            .unwrap();
        assert_eq!(backend.len(Region::Meta).unwrap(), 0);
    }

    #[test]
    fn scan_visits_in_key_order() {
        let backend = InMemoryBackend::new();
        backend
            .commit(
                WriteBatch::new()
                    .put(Region::Meta, "b", "2")
                    .put(Region::Meta, "a", "1")
                    .put(Region::Meta, "c", "3"),
            )
            .unwrap();
        let mut keys = Vec::new();
        backend
            .scan(Region::Meta, &mut |k, _| {
                keys.push(k.to_vec());
                Ok(())
            })
            .unwrap();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn scan_stops_on_visitor_error() {
        let backend = InMemoryBackend::new();
        backend
            .commit(WriteBatch::new().put(Region::Meta, "a", "1").put(Region::Meta, "b", "2"))
            .unwrap();
        let mut seen = 0;
        let err = backend
            .scan(Region::Meta, &mut |_, _| {
                seen += 1;
                Err(StoreError::Serialization("bad record".into()))
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
        assert_eq!(seen, 1);
    }

    #[test]
    fn read_with_reports_missing() {
        let backend = InMemoryBackend::new();
        backend
            .commit(WriteBatch::new().put(Region::Payload, "k", "value"))
            .unwrap();
        let mut out = Vec::new();
        assert!(backend
            .read_with(Region::Payload, b"k", &mut |v| {
                out.extend_from_slice(v);
                Ok(())
            })
            .unwrap());
        assert_eq!(out, b"value");
        assert!(!backend.read_with(Region::Payload, b"x", &mut |_| Ok(())).unwrap());
    }

    #[test]
    fn total_bytes_and_clear() {
        let backend = InMemoryBackend::new();
        backend
            .commit(WriteBatch::new().put(Region::Payload, "a", "12345").put(Region::Meta, "a", "123"))
            .unwrap();
        assert_eq!(backend.total_bytes(), 8);
        backend.clear();
        assert_eq!(backend.total_bytes(), 0);
        assert!(!backend.contains(Region::Payload, b"a").unwrap());
    }

    #[test]
    fn concurrent_reads_are_safe() {
        use std::sync::Arc;
        use std::thread;

        let backend = Arc::new(InMemoryBackend::new());
        backend
            .commit(WriteBatch::new().put(Region::Payload, "shared", "data"))
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let backend = Arc::clone(&backend);
                thread::spawn(move || {
                    let value = backend.get(Region::Payload, b"shared").unwrap();
                    assert_eq!(value.as_deref(), Some(&b"data"[..]));
                })
            })
            .collect();

        for h in handles {
            h.join().expect("thread should not panic");
        }
    }

    #[test]
    fn debug_format() {
        let backend = InMemoryBackend::new();
        let debug = format!("{backend:?}");
        assert!(debug.contains("InMemoryBackend"));
        assert!(debug.contains("payload_count"));
    }
}
