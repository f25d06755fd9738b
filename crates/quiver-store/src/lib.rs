//! Multi-index object storage for quiver.
//!
//! A [`Bucket`] keeps every object in three regions of one embedded
//! key-value engine: the payload keyed by identity, the identity keyed by
//! `<name>_<owner>`, and the encoded metadata keyed by identity. Queries
//! scan the metadata region and resolve each match against the other two.
//!
//! # Storage Backends
//!
//! All backends implement the [`KvBackend`] trait:
//!
//! - [`LmdbBackend`] -- LMDB environment with one named database per region
//! - [`InMemoryBackend`] -- `BTreeMap`-based backend for tests and embedding
//!
//! # Design Rules
//!
//! 1. In [`WriteMode::Atomic`] every create and delete is one engine transaction.
//! 2. Name uniqueness is enforced by a conditional insert on the name region.
//! 3. Queries read from one snapshot of the metadata region; matches that
//!    vanish before resolution are skipped, not reported as errors.
//! 4. [`Bucket::reconcile`] repairs whatever [`WriteMode::Independent`] leaves behind.
//! 5. All I/O errors are propagated, never silently ignored.

pub mod bucket;
pub mod config;
pub mod error;
pub mod keys;
pub mod lmdb_backend;
mod locks;
mod maintenance;
pub mod memory;
pub mod repair;
pub mod traits;

#[cfg(test)]
mod testing;

// Re-export primary types at crate root for ergonomic imports.
pub use bucket::{Bucket, QueryOutcome};
pub use config::{BucketConfig, EngineConfig, MaintenanceConfig, SyncMode, WriteMode};
pub use error::{StoreError, StoreResult};
pub use keys::name_key;
pub use lmdb_backend::LmdbBackend;
pub use memory::InMemoryBackend;
pub use repair::RepairReport;
pub use traits::{BatchOp, KvBackend, Region, ScanVisitor, WriteBatch};
