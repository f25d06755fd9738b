//! Foundation types for the quiver object store.
//!
//! This crate provides the in-memory side of the store: identities, the
//! metadata bag attached to every object, the object entity itself and the
//! query builder used to select objects by metadata. Persistence lives in
//! `quiver-store`.
//!
//! # Key Types
//!
//! - [`ObjectId`] -- random UUID v4 identity assigned once at creation
//! - [`MetaKey`] -- well-known or free-form metadata key
//! - [`Metadata`] -- key/value bag with protected system keys
//! - [`Object`] -- named, owner-scoped payload that seals after creation
//! - [`Query`] -- metadata predicate with AND/OR logic and an operation

pub mod error;
pub mod identity;
pub mod metadata;
pub mod object;
pub mod query;

pub use error::TypeError;
pub use identity::{is_valid_uuid, normalize_uuid, ObjectId};
pub use metadata::{MetaKey, Metadata, PROTECTED_KEYS};
pub use object::{Object, MAX_NAME_LEN};
pub use query::{Action, Operation, Query};
