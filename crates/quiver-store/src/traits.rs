use std::fmt;

use crate::error::StoreResult;

/// One of the three independent key spaces a bucket maintains.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Region {
    /// identity -> raw payload bytes
    Payload,
    /// `<name>_<owner>` -> identity
    Name,
    /// identity -> encoded metadata record
    Meta,
}

impl Region {
    pub const ALL: [Region; 3] = [Region::Payload, Region::Name, Region::Meta];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Payload => "payload",
            Self::Name => "name",
            Self::Meta => "meta",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Self::Payload => 0,
            Self::Name => 1,
            Self::Meta => 2,
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single mutation inside a [`WriteBatch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite.
    Put { region: Region, key: Vec<u8>, value: Vec<u8> },
    /// Insert only if the key is absent; otherwise the whole batch fails
    /// with [`StoreError::KeyExists`](crate::StoreError::KeyExists).
    PutNew { region: Region, key: Vec<u8>, value: Vec<u8> },
    /// Remove the key. Removing an absent key is not an error.
    Delete { region: Region, key: Vec<u8> },
}

impl BatchOp {
    pub fn region(&self) -> Region {
        match self {
            Self::Put { region, .. } | Self::PutNew { region, .. } | Self::Delete { region, .. } => *region,
        }
    }
}

/// Ordered group of mutations committed all-or-nothing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(mut self, region: Region, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        self.ops.push(BatchOp::Put {
            region,
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn put_new(mut self, region: Region, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        self.ops.push(BatchOp::PutNew {
            region,
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn delete(mut self, region: Region, key: impl Into<Vec<u8>>) -> Self {
        self.ops.push(BatchOp::Delete {
            region,
            key: key.into(),
        });
        self
    }

    /// Append all operations of `other`.
    pub fn extend(mut self, other: WriteBatch) -> Self {
        self.ops.extend(other.ops);
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Returns `true` if any operation targets `region`.
    pub fn touches(&self, region: Region) -> bool {
        self.ops.iter().any(|op| op.region() == region)
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Visitor over `(key, value)` pairs of a region scan.
pub type ScanVisitor<'a> = dyn FnMut(&[u8], &[u8]) -> StoreResult<()> + 'a;

/// Embedded key-value engine holding the three bucket regions.
///
/// All implementations must satisfy these invariants:
/// - Reads observe a consistent snapshot of the store as of their start.
/// - [`commit`](Self::commit) applies every operation of a batch or none.
/// - Visitors passed to [`scan`](Self::scan) and
///   [`read_with`](Self::read_with) must not call back into the backend.
/// - All I/O errors are propagated, never silently ignored.
pub trait KvBackend: Send + Sync {
    /// Read a value. Returns `Ok(None)` if the key does not exist.
    fn get(&self, region: Region, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Visit a value in place without copying it out of the engine.
    ///
    /// Returns `Ok(false)` if the key does not exist.
    fn read_with(
        &self,
        region: Region,
        key: &[u8],
        visit: &mut dyn FnMut(&[u8]) -> StoreResult<()>,
    ) -> StoreResult<bool>;

    /// Visit every entry of a region in key order from one snapshot.
    fn scan(&self, region: Region, visit: &mut ScanVisitor<'_>) -> StoreResult<()>;

    /// Apply a batch atomically.
    fn commit(&self, batch: WriteBatch) -> StoreResult<()>;

    /// Force buffered writes to durable storage.
    fn flush(&self) -> StoreResult<()>;

    /// Check whether a key exists.
    fn contains(&self, region: Region, key: &[u8]) -> StoreResult<bool> {
        Ok(self.get(region, key)?.is_some())
    }

    /// Number of entries in a region.
    ///
    /// Default implementation counts with a full scan.
    fn len(&self, region: Region) -> StoreResult<usize> {
        let mut count = 0;
        self.scan(region, &mut |_, _| {
            count += 1;
            Ok(())
        })?;
        Ok(count)
    }
}
