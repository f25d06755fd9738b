//! LMDB-backed storage engine.
//!
//! The three bucket regions are named databases inside one LMDB
//! environment, so a single write transaction can cover all of them.

use std::fs;
use std::path::{Path, PathBuf};

use lmdb::{Cursor, Database, DatabaseFlags, Environment, EnvironmentFlags, Transaction, WriteFlags};
use lmdb_sys as ffi;
use tracing::debug;

use crate::config::{EngineConfig, SyncMode};
use crate::error::{StoreError, StoreResult};
use crate::traits::{BatchOp, KvBackend, Region, ScanVisitor, WriteBatch};

impl From<lmdb::Error> for StoreError {
    fn from(e: lmdb::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Persistent backend on top of an LMDB environment.
pub struct LmdbBackend {
    env: Environment,
    dbs: [Database; 3],
    path: PathBuf,
}

impl LmdbBackend {
    /// Open (or create) the environment at `path`.
    pub fn open(path: &Path, config: &EngineConfig) -> StoreResult<Self> {
        fs::create_dir_all(path)?;

        let mut flags = EnvironmentFlags::empty();
        match config.sync {
            SyncMode::Full => {}
            SyncMode::NoMetaSync => flags.insert(EnvironmentFlags::NO_META_SYNC),
            SyncMode::NoSync => flags.insert(EnvironmentFlags::NO_SYNC),
        }

        let mut builder = Environment::new();
        builder.set_max_dbs(Region::ALL.len() as u32);
        builder.set_map_size(config.map_size);
        builder.set_max_readers(config.max_readers);
        builder.set_flags(flags);
        let env = builder.open(path)?;

        let payload = env.create_db(Some(Region::Payload.as_str()), DatabaseFlags::empty())?;
        let name = env.create_db(Some(Region::Name.as_str()), DatabaseFlags::empty())?;
        let meta = env.create_db(Some(Region::Meta.as_str()), DatabaseFlags::empty())?;

        debug!(path = %path.display(), "lmdb environment opened");
        Ok(Self {
            env,
            dbs: [payload, name, meta],
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn db(&self, region: Region) -> Database {
        self.dbs[region.index()]
    }
}

impl KvBackend for LmdbBackend {
    fn get(&self, region: Region, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let txn = self.env.begin_ro_txn()?;
        match txn.get(self.db(region), &key) {
            Ok(value) => Ok(Some(value.to_vec())),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read_with(
        &self,
        region: Region,
        key: &[u8],
        visit: &mut dyn FnMut(&[u8]) -> StoreResult<()>,
    ) -> StoreResult<bool> {
        let txn = self.env.begin_ro_txn()?;
        match txn.get(self.db(region), &key) {
            Ok(value) => {
                visit(value)?;
                Ok(true)
            }
            Err(lmdb::Error::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Walks the region with explicit cursor ops rather than `Cursor::iter`,
    /// whose iterator panics on cursor errors instead of returning them.
    fn scan(&self, region: Region, visit: &mut ScanVisitor<'_>) -> StoreResult<()> {
        let txn = self.env.begin_ro_txn()?;
        {
            let cursor = txn.open_ro_cursor(self.db(region))?;
            let mut op = ffi::MDB_FIRST;
            loop {
                match cursor.get(None, None, op) {
                    Ok((Some(key), value)) => visit(key, value)?,
                    Ok((None, _)) => {
                        return Err(StoreError::Backend("cursor returned an entry without a key".into()))
                    }
                    Err(lmdb::Error::NotFound) => break,
                    Err(e) => return Err(e.into()),
                }
                op = ffi::MDB_NEXT;
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        // Any early return drops the transaction, which aborts it.
        let mut txn = self.env.begin_rw_txn()?;
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { region, key, value } => {
                    txn.put(self.db(region), &key, &value, WriteFlags::empty())?;
                }
                BatchOp::PutNew { region, key, value } => {
                    match txn.put(self.db(region), &key, &value, WriteFlags::NO_OVERWRITE) {
                        Ok(()) => {}
                        Err(lmdb::Error::KeyExist) => {
                            return Err(StoreError::KeyExists {
                                region,
                                key: String::from_utf8_lossy(&key).into_owned(),
                            })
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                BatchOp::Delete { region, key } => match txn.del(self.db(region), &key, None) {
                    Ok(()) | Err(lmdb::Error::NotFound) => {}
                    Err(e) => return Err(e.into()),
                },
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn flush(&self) -> StoreResult<()> {
        self.env.sync(true)?;
        Ok(())
    }
}

impl std::fmt::Debug for LmdbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbBackend")
            .field("path", &self.path)
            .finish()
    }
}
