use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypeError;

/// Unique identity of a stored object.
///
/// Generated randomly (UUID v4) when an object is constructed and never
/// reused. The textual form is the lowercase hyphenated UUID, which is also
/// the key under which the payload and metadata records are stored.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// Allocate a fresh random identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an identity from any textual UUID form.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| TypeError::InvalidUuid {
                field: "id",
                value: s.to_string(),
            })
    }

    /// Parse an identity stored as a raw key.
    pub fn from_key(key: &[u8]) -> Result<Self, TypeError> {
        let s = std::str::from_utf8(key).map_err(|e| TypeError::Serialization(e.to_string()))?;
        Self::parse(s)
    }

    /// Storage key: the canonical textual form as bytes.
    pub fn to_key(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// First eight hex characters, for log lines.
    pub fn short_id(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for ObjectId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.short_id())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Returns `true` if `s` is a syntactically valid UUID.
pub fn is_valid_uuid(s: &str) -> bool {
    Uuid::parse_str(s).is_ok()
}

/// Canonicalize a UUID string to its lowercase hyphenated form.
///
/// `field` names the offending field in the returned error.
pub fn normalize_uuid(field: &'static str, s: &str) -> Result<String, TypeError> {
    Uuid::parse_str(s)
        .map(|u| u.hyphenated().to_string())
        .map_err(|_| TypeError::InvalidUuid {
            field,
            value: s.to_string(),
        })
}
