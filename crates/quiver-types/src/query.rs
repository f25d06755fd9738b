use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::identity::{is_valid_uuid, normalize_uuid};
use crate::metadata::{MetaKey, Metadata};

/// Logical connection between the parameters of a [`Query`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// A record matches if any parameter matches.
    #[default]
    Or,
    /// A record matches only if every parameter matches.
    And,
}

/// What the store does with the objects a [`Query`] selects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    #[default]
    Get,
    Delete,
}

/// Metadata predicate plus the operation to run on matching objects.
///
/// Built fluently and handed to the store once:
///
/// ```
/// use quiver_types::{Action, Operation, Query};
///
/// let q = Query::new()
///     .param("contentType", "text/plain")
///     .owner("3f1c9a52-8e0b-4d7a-b6c1-2a9e5f7d0b34")
///     .action(Action::And)
///     .operation(Operation::Get);
/// assert!(q.validate().is_ok());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query {
    params: Metadata,
    action: Action,
    operation: Operation,
}

impl Query {
    /// An empty `OR` / `GET` query.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(self, owner: impl Into<String>) -> Self {
        self.param(MetaKey::Owner, owner)
    }

    pub fn id(self, id: impl Into<String>) -> Self {
        self.param(MetaKey::Id, id)
    }

    pub fn name(self, name: impl Into<String>) -> Self {
        self.param(MetaKey::Name, name)
    }

    /// Add an arbitrary `key = value` constraint. System keys are allowed.
    ///
    /// Valid UUIDs given for `owner` or `id` are stored canonically, the
    /// same form the store writes.
    pub fn param(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        let key = key.as_ref();
        let mut value = value.into();
        if key == MetaKey::Owner.as_str() || key == MetaKey::Id.as_str() {
            value = canonical_uuid(value);
        }
        self.params.set_system(key, value);
        self
    }

    pub fn action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    pub fn operation(mut self, operation: Operation) -> Self {
        self.operation = operation;
        self
    }

    pub fn params(&self) -> &Metadata {
        &self.params
    }

    pub fn logic(&self) -> Action {
        self.action
    }

    pub fn op(&self) -> Operation {
        self.operation
    }

    /// Check the query before any index is touched.
    ///
    /// Rejects, in order: a query without non-empty parameters, a malformed
    /// `owner` or `id`, and a `name` without an `owner`.
    pub fn validate(&self) -> Result<(), TypeError> {
        if self.params.iter().all(|(_, v)| v.is_empty()) {
            return Err(TypeError::EmptyQuery);
        }
        let present = |key: MetaKey| self.params.get(key).filter(|v| !v.is_empty());
        if let Some(owner) = present(MetaKey::Owner) {
            if !is_valid_uuid(owner) {
                return Err(TypeError::InvalidUuid {
                    field: "owner",
                    value: owner.to_string(),
                });
            }
        }
        if let Some(id) = present(MetaKey::Id) {
            if !is_valid_uuid(id) {
                return Err(TypeError::InvalidUuid {
                    field: "id",
                    value: id.to_string(),
                });
            }
        }
        if present(MetaKey::Name).is_some() && present(MetaKey::Owner).is_none() {
            return Err(TypeError::NameOwnerMissing);
        }
        Ok(())
    }

    /// Evaluate the predicate against a stored metadata record.
    pub fn matches(&self, record: &Metadata) -> bool {
        record.matches(&self.params, self.action)
    }
}

// Stored owners and ids are canonical; keep malformed input verbatim so
// that `validate` can report it.
fn canonical_uuid(value: String) -> String {
    normalize_uuid("id", &value).unwrap_or(value)
}
