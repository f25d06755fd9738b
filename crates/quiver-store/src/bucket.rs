use std::collections::HashSet;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use quiver_types::{normalize_uuid, MetaKey, Metadata, Object, ObjectId, Operation, Query, TypeError, MAX_NAME_LEN};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{BucketConfig, WriteMode};
use crate::error::{StoreError, StoreResult};
use crate::keys::name_key;
use crate::lmdb_backend::LmdbBackend;
use crate::locks::NameLocks;
use crate::maintenance::Maintenance;
use crate::repair::{self, RepairReport};
use crate::traits::{KvBackend, Region, WriteBatch};

/// Result of [`Bucket::execute`].
#[derive(Debug)]
pub enum QueryOutcome {
    /// Objects matched by a [`Operation::Get`] query.
    Fetched(Vec<Object>),
    /// Number of objects removed by a [`Operation::Delete`] query.
    Deleted(usize),
}

/// The encoded form of one object, ready to be written.
struct Entry<'a> {
    id: ObjectId,
    name: &'a str,
    owner: &'a str,
    id_key: Vec<u8>,
    name_key: Vec<u8>,
    payload: &'a [u8],
    meta: Vec<u8>,
}

impl<'a> Entry<'a> {
    fn prepare(obj: &'a Object, require_content_type: bool) -> StoreResult<Self> {
        if obj.is_immutable() {
            return Err(TypeError::Immutable(obj.id().to_string()).into());
        }
        obj.validate(require_content_type)?;
        let meta = obj
            .metadata()
            .encode()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Self {
            id: obj.id(),
            name: obj.name(),
            owner: obj.owner(),
            id_key: obj.id().to_key(),
            name_key: name_key(obj.name(), obj.owner()),
            payload: obj.payload(),
            meta,
        })
    }

    fn payload_write(&self) -> WriteBatch {
        WriteBatch::new().put(Region::Payload, self.id_key.clone(), self.payload.to_vec())
    }

    fn name_write(&self) -> WriteBatch {
        WriteBatch::new().put_new(Region::Name, self.name_key.clone(), self.id_key.clone())
    }

    fn meta_write(&self) -> WriteBatch {
        WriteBatch::new().put(Region::Meta, self.id_key.clone(), self.meta.clone())
    }

    fn name_conflict(&self) -> StoreError {
        StoreError::NameConflict {
            name: self.name.to_string(),
            owner: self.owner.to_string(),
        }
    }
}

/// Translate a failed conditional insert on the name region into the
/// conflict of the entry that owns the key.
fn conflict_for(entries: &[Entry<'_>], err: StoreError) -> StoreError {
    if let StoreError::KeyExists { region: Region::Name, key } = &err {
        if let Some(entry) = entries.iter().find(|e| e.name_key == key.as_bytes()) {
            return entry.name_conflict();
        }
    }
    err
}

fn decode_error(e: TypeError) -> StoreError {
    StoreError::Serialization(e.to_string())
}

/// A multi-index object store.
///
/// Every object lives in three regions of one engine: its payload and its
/// encoded metadata keyed by identity, and its identity keyed by
/// `<name>_<owner>`. Creates and deletes keep the regions consistent; in
/// [`WriteMode::Independent`] a failure part-way through can leave them out
/// of step until [`reconcile`](Self::reconcile) runs.
pub struct Bucket {
    backend: Arc<dyn KvBackend>,
    config: BucketConfig,
    base_path: Option<PathBuf>,
    name_locks: NameLocks,
    /// Shared by foreground mutations, exclusive for reconciliation.
    gate: Arc<RwLock<()>>,
    maintenance: Option<Maintenance>,
}

impl Bucket {
    /// Open a new bucket in a fresh unique directory under `config.base_dir`.
    pub fn open(config: BucketConfig) -> StoreResult<Self> {
        let path = config.base_dir.join(Uuid::new_v4().to_string());
        Self::open_at(path, config)
    }

    /// Open (or reopen) the bucket stored at `path`.
    pub fn open_at(path: impl AsRef<Path>, config: BucketConfig) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let backend = LmdbBackend::open(&path, &config.engine)?;
        Self::build(Arc::new(backend), config, Some(path))
    }

    /// Build a bucket over an existing backend.
    pub fn with_backend(backend: Arc<dyn KvBackend>, config: BucketConfig) -> StoreResult<Self> {
        Self::build(backend, config, None)
    }

    fn build(backend: Arc<dyn KvBackend>, config: BucketConfig, base_path: Option<PathBuf>) -> StoreResult<Self> {
        let gate = Arc::new(RwLock::new(()));
        let maintenance = if config.maintenance.enabled {
            if config.maintenance.interval_secs == 0 {
                return Err(StoreError::Config("maintenance interval must be positive".into()));
            }
            Some(Maintenance::spawn(
                Arc::clone(&backend),
                Arc::clone(&gate),
                &config.maintenance,
            )?)
        } else {
            None
        };
        info!(
            path = ?base_path,
            write_mode = ?config.write_mode,
            maintenance = config.maintenance.enabled,
            "bucket opened"
        );
        Ok(Self {
            backend,
            config,
            base_path,
            name_locks: NameLocks::default(),
            gate,
            maintenance,
        })
    }

    /// Directory holding the engine files, if the bucket is on disk.
    pub fn base_path(&self) -> Option<&Path> {
        self.base_path.as_deref()
    }

    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    // ---- Writes ----

    /// Persist a new object and seal it.
    ///
    /// Fails with [`StoreError::NameConflict`] if another object already
    /// uses the same name for the same owner.
    pub fn create(&self, obj: &mut Object) -> StoreResult<ObjectId> {
        let entry = Entry::prepare(obj, self.config.require_content_type)?;
        let id = entry.id;
        {
            let _shared = self.gate.read();
            let _name = self.name_locks.lock(&entry.name_key);
            match self.config.write_mode {
                WriteMode::Atomic => {
                    let batch = entry.name_write().extend(entry.payload_write()).extend(entry.meta_write());
                    self.backend
                        .commit(batch)
                        .map_err(|e| conflict_for(std::slice::from_ref(&entry), e))?;
                }
                WriteMode::Independent => {
                    if self.backend.contains(Region::Name, &entry.name_key)? {
                        return Err(entry.name_conflict());
                    }
                    self.backend.commit(entry.payload_write())?;
                    self.backend
                        .commit(entry.name_write())
                        .map_err(|e| conflict_for(std::slice::from_ref(&entry), e))?;
                    self.backend.commit(entry.meta_write())?;
                }
            }
        }
        obj.seal();
        if self.config.log_operations {
            debug!(id = %id, name = obj.name(), owner = obj.owner(), size = obj.len(), "created object");
        }
        Ok(id)
    }

    /// Persist several objects and seal them.
    ///
    /// Every object is validated, and names are checked for duplicates
    /// within the batch, before anything is written. In
    /// [`WriteMode::Independent`] the payloads are committed together but
    /// each name and metadata entry separately, so a failure part-way
    /// through leaves payloads without indexes for the remaining objects.
    /// Objects written before the failure are sealed.
    pub fn batch_create(&self, objs: &mut [Object]) -> StoreResult<Vec<ObjectId>> {
        if objs.is_empty() {
            return Ok(Vec::new());
        }
        let entries = objs
            .iter()
            .map(|o| Entry::prepare(o, self.config.require_content_type))
            .collect::<StoreResult<Vec<_>>>()?;
        let mut seen = HashSet::new();
        if let Some(dup) = entries.iter().find(|e| !seen.insert(e.name_key.as_slice())) {
            return Err(dup.name_conflict());
        }

        let (done, outcome) = {
            let _shared = self.gate.read();
            let _names = self.name_locks.lock_many(entries.iter().map(|e| e.name_key.as_slice()));
            match self.config.write_mode {
                WriteMode::Atomic => {
                    let batch = entries.iter().fold(WriteBatch::new(), |b, e| {
                        b.extend(e.name_write()).extend(e.payload_write()).extend(e.meta_write())
                    });
                    match self.backend.commit(batch) {
                        Ok(()) => (entries.len(), Ok(())),
                        Err(e) => (0, Err(conflict_for(&entries, e))),
                    }
                }
                WriteMode::Independent => self.commit_each(&entries),
            }
        };

        let ids: Vec<ObjectId> = entries.iter().map(|e| e.id).collect();
        drop(entries);
        // Objects that reached every region are persisted even if a later one failed.
        for obj in &mut objs[..done] {
            obj.seal();
        }
        outcome?;
        if self.config.log_operations {
            debug!(count = ids.len(), "created batch");
        }
        Ok(ids)
    }

    /// Independent-mode batch: payloads in one commit, then name and
    /// metadata per object. Returns how many objects were fully written.
    fn commit_each(&self, entries: &[Entry<'_>]) -> (usize, StoreResult<()>) {
        for e in entries {
            match self.backend.contains(Region::Name, &e.name_key) {
                Ok(false) => {}
                Ok(true) => return (0, Err(e.name_conflict())),
                Err(err) => return (0, Err(err)),
            }
        }
        let payloads = entries.iter().fold(WriteBatch::new(), |b, e| b.extend(e.payload_write()));
        if let Err(err) = self.backend.commit(payloads) {
            return (0, Err(err));
        }
        for (done, e) in entries.iter().enumerate() {
            let written = self
                .backend
                .commit(e.name_write())
                .map_err(|err| conflict_for(std::slice::from_ref(e), err))
                .and_then(|()| self.backend.commit(e.meta_write()));
            if let Err(err) = written {
                return (done, Err(err));
            }
        }
        (entries.len(), Ok(()))
    }

    // ---- Lookups ----

    /// Decoded metadata record of an object.
    pub fn get_meta(&self, id: &ObjectId) -> StoreResult<Metadata> {
        let raw = self
            .backend
            .get(Region::Meta, &id.to_key())?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Metadata::decode(&raw).map_err(decode_error)
    }

    /// Raw payload bytes of an object.
    pub fn get_payload(&self, id: &ObjectId) -> StoreResult<Vec<u8>> {
        self.backend
            .get(Region::Payload, &id.to_key())?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub fn get_by_id(&self, id: &ObjectId) -> StoreResult<Object> {
        let meta = self.get_meta(id)?;
        let payload = self.get_payload(id)?;
        let obj = Object::from_parts(meta, payload).map_err(decode_error)?;
        if self.config.log_operations {
            debug!(id = %id, size = obj.len(), "fetched object");
        }
        Ok(obj)
    }

    pub fn get_by_name(&self, name: &str, owner: &str) -> StoreResult<Object> {
        let id = self.resolve_name(name, owner)?;
        self.get_by_id(&id)
    }

    fn resolve_name(&self, name: &str, owner: &str) -> StoreResult<ObjectId> {
        let owner = normalize_uuid("owner", owner)?;
        let not_found = || StoreError::NameNotFound {
            name: name.to_string(),
            owner: owner.clone(),
        };
        // Names over the limit are never stored.
        if name.len() > MAX_NAME_LEN {
            return Err(not_found());
        }
        let raw = self
            .backend
            .get(Region::Name, &name_key(name, &owner))?
            .ok_or_else(not_found)?;
        ObjectId::from_key(&raw).map_err(decode_error)
    }

    /// Returns `true` if an object with this identity has a metadata record.
    pub fn exists(&self, id: &ObjectId) -> StoreResult<bool> {
        self.backend.contains(Region::Meta, &id.to_key())
    }

    /// Number of stored objects.
    pub fn len(&self) -> StoreResult<usize> {
        self.backend.len(Region::Meta)
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Stream an object's payload into `sink`, returning the bytes written.
    ///
    /// The payload is copied straight out of the engine's read snapshot.
    pub fn read<W: Write + ?Sized>(&self, id: &ObjectId, sink: &mut W) -> StoreResult<u64> {
        self.get_meta(id)?;
        let mut written = 0u64;
        let found = self.backend.read_with(Region::Payload, &id.to_key(), &mut |bytes| {
            sink.write_all(bytes)?;
            written = bytes.len() as u64;
            Ok(())
        })?;
        if !found {
            return Err(StoreError::NotFound(id.to_string()));
        }
        sink.flush()?;
        if self.config.log_operations {
            debug!(id = %id, bytes = written, "streamed payload");
        }
        Ok(written)
    }

    // ---- Queries ----

    /// Validate `query` and run it as its operation says.
    pub fn execute(&self, query: &Query) -> StoreResult<QueryOutcome> {
        match query.op() {
            Operation::Get => self.get(query).map(QueryOutcome::Fetched),
            Operation::Delete => self.delete(query).map(QueryOutcome::Deleted),
        }
    }

    /// Identities whose metadata record matches `query`, from one snapshot.
    fn matching_ids(&self, query: &Query) -> StoreResult<Vec<ObjectId>> {
        query.validate()?;
        let mut ids = Vec::new();
        self.backend.scan(Region::Meta, &mut |key, value| {
            let record = Metadata::decode(value).map_err(decode_error)?;
            if query.matches(&record) {
                ids.push(ObjectId::from_key(key).map_err(decode_error)?);
            }
            Ok(())
        })?;
        Ok(ids)
    }

    /// Fetch every object matching `query`.
    ///
    /// Objects deleted between the scan and their resolution are left out.
    pub fn get(&self, query: &Query) -> StoreResult<Vec<Object>> {
        let ids = self.matching_ids(query)?;
        let mut objects = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_by_id(&id) {
                Ok(obj) => objects.push(obj),
                Err(e) if e.is_not_found() => {
                    debug!(id = %id, "matched object vanished before it was fetched");
                }
                Err(e) => return Err(e),
            }
        }
        if self.config.log_operations {
            debug!(matched = objects.len(), action = ?query.logic(), "query fetched");
        }
        Ok(objects)
    }

    /// Delete every object matching `query` and return how many were removed.
    ///
    /// `Ok(0)` means nothing matched; a failed scan is an error.
    pub fn delete(&self, query: &Query) -> StoreResult<usize> {
        let ids = self.matching_ids(query)?;
        let mut removed = 0;
        for id in ids {
            match self.delete_by_id(&id) {
                Ok(()) => removed += 1,
                Err(e) if e.is_not_found() => {
                    debug!(id = %id, "matched object already deleted");
                }
                Err(e) => return Err(e),
            }
        }
        if self.config.log_operations {
            debug!(removed, action = ?query.logic(), "query deleted");
        }
        Ok(removed)
    }

    // ---- Deletes ----

    /// Remove an object from all three regions.
    ///
    /// The name entry is only removed while it still points at this object.
    pub fn delete_by_id(&self, id: &ObjectId) -> StoreResult<()> {
        let _shared = self.gate.read();
        let meta = self.get_meta(id)?;
        let id_key = id.to_key();

        let key = match (meta.get(MetaKey::Name), meta.get(MetaKey::Owner)) {
            (Some(name), Some(owner)) => Some(name_key(name, owner)),
            _ => None,
        };
        let _name = key.as_deref().map(|k| self.name_locks.lock(k));
        let mut name_del = WriteBatch::new();
        if let Some(key) = key {
            if self.backend.get(Region::Name, &key)?.as_deref() == Some(id_key.as_slice()) {
                name_del = name_del.delete(Region::Name, key);
            }
        }
        let payload_del = WriteBatch::new().delete(Region::Payload, id_key.clone());
        let meta_del = WriteBatch::new().delete(Region::Meta, id_key);

        match self.config.write_mode {
            WriteMode::Atomic => self.backend.commit(name_del.extend(payload_del).extend(meta_del))?,
            WriteMode::Independent => {
                if !name_del.is_empty() {
                    self.backend.commit(name_del)?;
                }
                self.backend.commit(payload_del)?;
                self.backend.commit(meta_del)?;
            }
        }
        if self.config.log_operations {
            debug!(id = %id, "deleted object");
        }
        Ok(())
    }

    pub fn delete_by_name(&self, name: &str, owner: &str) -> StoreResult<()> {
        let id = self.resolve_name(name, owner)?;
        self.delete_by_id(&id)
    }

    // ---- Lifecycle ----

    /// Force buffered writes to durable storage.
    pub fn flush(&self) -> StoreResult<()> {
        self.backend.flush()
    }

    /// Bring the three regions back into agreement.
    ///
    /// Waits for in-flight writes and holds further ones back while it runs.
    pub fn reconcile(&self) -> StoreResult<RepairReport> {
        let _exclusive = self.gate.write();
        repair::reconcile(self.backend.as_ref())
    }

    /// Stop maintenance, flush and release the engine.
    ///
    /// Returns the first failure; later steps are not attempted.
    pub fn shutdown(mut self) -> StoreResult<()> {
        if let Some(task) = self.maintenance.take() {
            task.stop()?;
        }
        self.backend.flush()?;
        info!(path = ?self.base_path, "bucket shut down");
        Ok(())
    }
}

impl Drop for Bucket {
    fn drop(&mut self) {
        if let Some(task) = self.maintenance.take() {
            if let Err(e) = task.stop() {
                warn!(error = %e, "failed to stop maintenance task");
            }
        }
    }
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("base_path", &self.base_path)
            .field("write_mode", &self.config.write_mode)
            .field("maintenance", &self.maintenance.is_some())
            .finish()
    }
}
