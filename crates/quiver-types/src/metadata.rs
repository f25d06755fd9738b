use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::query::Action;

/// A metadata key: one of the well-known system keys or a free-form tag.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetaKey {
    Id,
    Name,
    Owner,
    CreatedAt,
    ContentType,
    Custom(String),
}

/// Keys that callers can never set or delete through [`Metadata::set`]
/// and [`Metadata::del`].
pub const PROTECTED_KEYS: [MetaKey; 2] = [MetaKey::Id, MetaKey::CreatedAt];

impl MetaKey {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Id => "id",
            Self::Name => "name",
            Self::Owner => "owner",
            Self::CreatedAt => "createdAt",
            Self::ContentType => "contentType",
            Self::Custom(s) => s.as_str(),
        }
    }

    pub fn is_protected(&self) -> bool {
        is_protected(self.as_str())
    }
}

fn is_protected(key: &str) -> bool {
    PROTECTED_KEYS.iter().any(|k| k.as_str() == key)
}

impl From<&str> for MetaKey {
    fn from(s: &str) -> Self {
        match s {
            "id" => Self::Id,
            "name" => Self::Name,
            "owner" => Self::Owner,
            "createdAt" => Self::CreatedAt,
            "contentType" => Self::ContentType,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for MetaKey {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl AsRef<str> for MetaKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for MetaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key/value bag attached to every object.
///
/// Key order is irrelevant; iteration is sorted by key. `id` and
/// `createdAt` are written by the system once and are ignored by
/// [`set`](Self::set) and [`del`](Self::del).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata {
    entries: BTreeMap<String, String>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key/value pair unless the key is protected.
    pub fn set(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        let key = key.as_ref();
        if is_protected(key) {
            return;
        }
        self.entries.insert(key.to_string(), value.into());
    }

    /// Insert without the protected-key check. Used for system fields and
    /// query predicates, which are never persisted as caller metadata.
    pub(crate) fn set_system(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.entries.insert(key.as_ref().to_string(), value.into());
    }

    pub fn get(&self, key: impl AsRef<str>) -> Option<&str> {
        self.entries.get(key.as_ref()).map(String::as_str)
    }

    pub fn has(&self, key: impl AsRef<str>) -> bool {
        self.entries.contains_key(key.as_ref())
    }

    /// Remove a key unless it is protected.
    pub fn del(&mut self, key: impl AsRef<str>) {
        let key = key.as_ref();
        if is_protected(key) {
            return;
        }
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Encode into the record format stored in the metadata region.
    pub fn encode(&self) -> Result<Vec<u8>, TypeError> {
        bincode::serialize(&self.entries).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    /// Decode a record produced by [`encode`](Self::encode).
    pub fn decode(data: &[u8]) -> Result<Self, TypeError> {
        let entries = bincode::deserialize(data).map_err(|e| TypeError::Serialization(e.to_string()))?;
        Ok(Self { entries })
    }

    /// Evaluate `params` as a predicate against this record.
    ///
    /// Parameters with an empty value are ignored. Under [`Action::Or`] the
    /// record matches if any remaining parameter is present with an equal
    /// value; under [`Action::And`] every remaining parameter must be. A
    /// predicate with no remaining parameters matches nothing.
    pub fn matches(&self, params: &Metadata, action: Action) -> bool {
        let mut constraints = params.iter().filter(|(_, v)| !v.is_empty()).peekable();
        if constraints.peek().is_none() {
            return false;
        }
        let hit = |(k, v): (&str, &str)| self.get(k) == Some(v);
        match action {
            Action::Or => constraints.any(hit),
            Action::And => constraints.all(hit),
        }
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut meta = Metadata::new();
        for (k, v) in iter {
            meta.set(k, v);
        }
        meta
    }
}
