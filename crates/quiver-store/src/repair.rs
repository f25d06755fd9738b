//! Reconciliation of the three regions after partial failures.
//!
//! Only [`WriteMode::Independent`](crate::WriteMode::Independent) can leave
//! the regions out of step, but the pass is safe to run on any bucket. The
//! caller must hold the bucket's exclusive repair gate so that no multi-step
//! write is in flight while the regions are compared.

use std::collections::{BTreeMap, BTreeSet};

use quiver_types::{MetaKey, Metadata};
use tracing::{info, warn};

use crate::error::StoreResult;
use crate::keys::name_key;
use crate::traits::{KvBackend, Region, WriteBatch};

/// What a reconciliation pass found and fixed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Payload entries without a metadata record (removed).
    pub orphaned_payloads: usize,
    /// Metadata records without a payload, or that could not be decoded
    /// (removed together with any payload).
    pub orphaned_metadata: usize,
    /// Live objects whose name entry was missing (re-inserted).
    pub restored_names: usize,
    /// Name entries pointing at a missing or different object (removed).
    pub dangling_names: usize,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        self.total() == 0
    }

    pub fn total(&self) -> usize {
        self.orphaned_payloads + self.orphaned_metadata + self.restored_names + self.dangling_names
    }
}

fn live_name_key(meta: &Metadata) -> Option<Vec<u8>> {
    let name = meta.get(MetaKey::Name).filter(|n| !n.is_empty())?;
    let owner = meta.get(MetaKey::Owner).filter(|o| !o.is_empty())?;
    Some(name_key(name, owner))
}

pub(crate) fn reconcile(backend: &dyn KvBackend) -> StoreResult<RepairReport> {
    let mut payloads = BTreeSet::new();
    backend.scan(Region::Payload, &mut |key, _| {
        payloads.insert(key.to_vec());
        Ok(())
    })?;

    let mut records: BTreeMap<Vec<u8>, Option<Metadata>> = BTreeMap::new();
    backend.scan(Region::Meta, &mut |key, value| {
        let decoded = match Metadata::decode(value) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!(id = %String::from_utf8_lossy(key), error = %e, "undecodable metadata record");
                None
            }
        };
        records.insert(key.to_vec(), decoded);
        Ok(())
    })?;

    let mut names = Vec::new();
    backend.scan(Region::Name, &mut |key, value| {
        names.push((key.to_vec(), value.to_vec()));
        Ok(())
    })?;

    let mut report = RepairReport::default();
    let mut batch = WriteBatch::new();

    for id in payloads.iter().filter(|id| !records.contains_key(*id)) {
        batch = batch.delete(Region::Payload, id.clone());
        report.orphaned_payloads += 1;
    }

    // id -> name key of every object that has both a payload and a usable record.
    let mut live = BTreeMap::new();
    for (id, record) in records {
        let key = record.as_ref().and_then(live_name_key);
        match key {
            Some(key) if payloads.contains(&id) => {
                live.insert(id, key);
            }
            _ => {
                batch = batch.delete(Region::Meta, id.clone()).delete(Region::Payload, id);
                report.orphaned_metadata += 1;
            }
        }
    }

    // name key -> id of the name entries that survive.
    let mut held = BTreeMap::new();
    for (key, id) in names {
        if live.get(&id) == Some(&key) {
            held.insert(key, id);
        } else {
            batch = batch.delete(Region::Name, key);
            report.dangling_names += 1;
        }
    }

    for (id, key) in live {
        match held.get(&key) {
            Some(holder) if *holder == id => {}
            Some(holder) => {
                warn!(
                    name_key = %String::from_utf8_lossy(&key),
                    holder = %String::from_utf8_lossy(holder),
                    id = %String::from_utf8_lossy(&id),
                    "name already held by another object; leaving entry unchanged"
                );
            }
            None => {
                batch = batch.put(Region::Name, key.clone(), id.clone());
                held.insert(key, id);
                report.restored_names += 1;
            }
        }
    }

    if !batch.is_empty() {
        backend.commit(batch)?;
    }
    if !report.is_clean() {
        info!(
            orphaned_payloads = report.orphaned_payloads,
            orphaned_metadata = report.orphaned_metadata,
            restored_names = report.restored_names,
            dangling_names = report.dangling_names,
            "reconciliation repaired bucket"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use quiver_types::Object;

    const OWNER: &str = "3f1c9a52-8e0b-4d7a-b6c1-2a9e5f7d0b34";

    fn full_write(obj: &Object) -> WriteBatch {
        let id = obj.id().to_key();
        WriteBatch::new()
            .put(Region::Payload, id.clone(), obj.payload().to_vec())
            .put(Region::Name, name_key(obj.name(), obj.owner()), id.clone())
            .put(Region::Meta, id, obj.metadata().encode().unwrap())
    }

    fn object(name: &str) -> Object {
        let mut obj = Object::new(name, OWNER).unwrap();
        obj.append(b"data").unwrap();
        obj
    }

    #[test]
    fn consistent_bucket_is_clean() {
        let backend = InMemoryBackend::new();
        backend.commit(full_write(&object("a"))).unwrap();
        backend.commit(full_write(&object("b"))).unwrap();
        let report = reconcile(&backend).unwrap();
        assert!(report.is_clean());
        assert_eq!(backend.len(Region::Name).unwrap(), 2);
    }

    #[test]
    fn removes_orphaned_payload() {
        let backend = InMemoryBackend::new();
        let obj = object("a");
        backend
            .commit(WriteBatch::new().put(Region::Payload, obj.id().to_key(), "data"))
            .unwrap();
        let report = reconcile(&backend).unwrap();
        assert_eq!(report.orphaned_payloads, 1);
        assert_eq!(report.total(), 1);
        assert_eq!(backend.len(Region::Payload).unwrap(), 0);
    }

    #[test]
    fn removes_metadata_without_payload_and_its_name() {
        let backend = InMemoryBackend::new();
        let obj = object("a");
        let mut batch = full_write(&obj);
        batch = batch.delete(Region::Payload, obj.id().to_key());
        backend.commit(batch).unwrap();

        let report = reconcile(&backend).unwrap();
        assert_eq!(report.orphaned_metadata, 1);
        assert_eq!(report.dangling_names, 1);
        for region in Region::ALL {
            assert_eq!(backend.len(region).unwrap(), 0, "{region} not empty");
        }
    }

    #[test]
    fn restores_missing_name_entry() {
        let backend = InMemoryBackend::new();
        let obj = object("a");
        backend.commit(full_write(&obj)).unwrap();
        backend
            .commit(WriteBatch::new().delete(Region::Name, name_key("a", OWNER)))
            .unwrap();

        let report = reconcile(&backend).unwrap();
        assert_eq!(report.restored_names, 1);
        assert_eq!(
            backend.get(Region::Name, &name_key("a", OWNER)).unwrap(),
            Some(obj.id().to_key())
        );
        assert!(reconcile(&backend).unwrap().is_clean());
    }

    #[test]
    fn repoints_name_held_by_dead_object() {
        let backend = InMemoryBackend::new();
        let obj = object("a");
        backend.commit(full_write(&obj)).unwrap();
        backend
            .commit(WriteBatch::new().put(Region::Name, name_key("a", OWNER), "ghost-id"))
            .unwrap();

        let report = reconcile(&backend).unwrap();
        assert_eq!(report.dangling_names, 1);
        assert_eq!(report.restored_names, 1);
        assert_eq!(
            backend.get(Region::Name, &name_key("a", OWNER)).unwrap(),
            Some(obj.id().to_key())
        );
    }

    #[test]
    fn drops_undecodable_record() {
        let backend = InMemoryBackend::new();
        backend
            .commit(
                WriteBatch::new()
                    .put(Region::Payload, "broken", "data")
                    .put(Region::Meta, "broken", vec![0xff]),
            )
            .unwrap();
        let report = reconcile(&backend).unwrap();
        assert_eq!(report.orphaned_metadata, 1);
        assert_eq!(report.orphaned_payloads, 0);
        assert_eq!(backend.len(Region::Payload).unwrap(), 0);
        assert_eq!(backend.len(Region::Meta).unwrap(), 0);
    }
}
