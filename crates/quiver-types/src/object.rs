use std::fmt;
use std::io;

use chrono::Utc;

use crate::error::TypeError;
use crate::identity::{is_valid_uuid, normalize_uuid, ObjectId};
use crate::metadata::{MetaKey, Metadata};

/// Longest accepted object name, in bytes.
///
/// Keeps the name-region key (`<name>_<owner>`) within the key size every
/// storage engine accepts.
pub const MAX_NAME_LEN: usize = 255;

/// A named, owner-scoped blob with metadata.
///
/// An object is freely mutable until the store persists it, after which it
/// is sealed: payload writes and metadata changes fail with
/// [`TypeError::Immutable`]. The system fields `id`, `name`, `owner` and
/// `createdAt` live in the metadata bag so that queries can match on them.
#[derive(Clone, PartialEq, Eq)]
pub struct Object {
    id: ObjectId,
    meta: Metadata,
    payload: Vec<u8>,
    immutable: bool,
}

impl Object {
    /// Create a new mutable object with a fresh identity.
    ///
    /// Fails if `owner` is not a valid UUID. The owner is stored in its
    /// canonical lowercase hyphenated form.
    pub fn new(name: impl Into<String>, owner: &str) -> Result<Self, TypeError> {
        let owner = normalize_uuid("owner", owner)?;
        let id = ObjectId::new();
        let mut meta = Metadata::new();
        meta.set_system(MetaKey::Id, id.to_string());
        meta.set_system(MetaKey::Name, name);
        meta.set_system(MetaKey::Owner, owner);
        meta.set_system(MetaKey::CreatedAt, Utc::now().to_rfc3339());
        Ok(Self {
            id,
            meta,
            payload: Vec::new(),
            immutable: false,
        })
    }

    /// Rebuild a persisted object from its stored metadata and payload.
    ///
    /// The result is sealed. Fails if `id`, `name` or `owner` are missing
    /// or the id is malformed.
    pub fn from_parts(meta: Metadata, payload: Vec<u8>) -> Result<Self, TypeError> {
        let id = meta.get(MetaKey::Id).ok_or(TypeError::MissingField("id"))?;
        let id = ObjectId::parse(id)?;
        if meta.get(MetaKey::Name).is_none() {
            return Err(TypeError::MissingField("name"));
        }
        if meta.get(MetaKey::Owner).is_none() {
            return Err(TypeError::MissingField("owner"));
        }
        Ok(Self {
            id,
            meta,
            payload,
            immutable: true,
        })
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.meta.get(MetaKey::Name).unwrap_or_default()
    }

    pub fn owner(&self) -> &str {
        self.meta.get(MetaKey::Owner).unwrap_or_default()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.meta.get(MetaKey::ContentType)
    }

    pub fn created_at(&self) -> Option<&str> {
        self.meta.get(MetaKey::CreatedAt)
    }

    pub fn metadata(&self) -> &Metadata {
        &self.meta
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// A reader over the payload bytes.
    pub fn reader(&self) -> impl io::Read + '_ {
        self.payload.as_slice()
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    /// Append bytes to the pending payload.
    pub fn append(&mut self, bytes: &[u8]) -> Result<usize, TypeError> {
        self.ensure_mutable()?;
        self.payload.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    /// Set a metadata key. Protected keys are silently ignored.
    ///
    /// A valid UUID written to `owner` is stored canonically so that name
    /// lookups agree with the stored key.
    pub fn set_meta_key(&mut self, key: impl AsRef<str>, value: impl Into<String>) -> Result<(), TypeError> {
        self.ensure_mutable()?;
        let mut value = value.into();
        if key.as_ref() == MetaKey::Owner.as_str() {
            if let Ok(owner) = normalize_uuid("owner", &value) {
                value = owner;
            }
        }
        self.meta.set(key, value);
        Ok(())
    }

    /// Remove a metadata key. Protected keys are silently ignored.
    pub fn del_meta_key(&mut self, key: impl AsRef<str>) -> Result<(), TypeError> {
        self.ensure_mutable()?;
        self.meta.del(key);
        Ok(())
    }

    /// Check the object is fit for persistence.
    pub fn validate(&self, require_content_type: bool) -> Result<(), TypeError> {
        if self.name().is_empty() {
            return Err(TypeError::MissingField("name"));
        }
        if self.name().len() > MAX_NAME_LEN {
            return Err(TypeError::NameTooLong {
                len: self.name().len(),
                max: MAX_NAME_LEN,
            });
        }
        let owner = self.owner();
        if owner.is_empty() {
            return Err(TypeError::MissingField("owner"));
        }
        if !is_valid_uuid(owner) {
            return Err(TypeError::InvalidUuid {
                field: "owner",
                value: owner.to_string(),
            });
        }
        match self.meta.get(MetaKey::Id) {
            Some(id) if ObjectId::parse(id).ok() == Some(self.id) => {}
            Some(id) => {
                return Err(TypeError::InvalidUuid {
                    field: "id",
                    value: id.to_string(),
                })
            }
            None => return Err(TypeError::MissingField("id")),
        }
        if require_content_type && self.content_type().map_or(true, str::is_empty) {
            return Err(TypeError::MissingField("contentType"));
        }
        Ok(())
    }

    /// Seal the object. Called by the store once it has been persisted.
    pub fn seal(&mut self) {
        self.immutable = true;
    }

    fn ensure_mutable(&self) -> Result<(), TypeError> {
        if self.immutable {
            return Err(TypeError::Immutable(self.id.to_string()));
        }
        Ok(())
    }
}

impl io::Write for Object {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf)
            .map_err(|e| io::Error::new(io::ErrorKind::PermissionDenied, e))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("owner", &self.owner())
            .field("size", &self.payload.len())
            .field("immutable", &self.immutable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    const OWNER: &str = "3f1c9a52-8e0b-4d7a-b6c1-2a9e5f7d0b34";

    #[test]
    fn new_rejects_invalid_owner() {
        let err = Object::new("report.txt", "bob").unwrap_err();
        assert!(matches!(err, TypeError::InvalidUuid { field: "owner", .. }));
    }

    #[test]
    fn new_populates_system_fields() {
        let obj = Object::new("report.txt", &OWNER.to_uppercase()).unwrap();
        assert_eq!(obj.name(), "report.txt");
        assert_eq!(obj.owner(), OWNER);
        assert_eq!(obj.metadata().get(MetaKey::Id), Some(obj.id().to_string().as_str()));
        assert!(obj.created_at().is_some());
        assert!(!obj.is_immutable());
        assert!(obj.validate(false).is_ok());
    }

    #[test]
    fn write_appends_until_sealed() {
        let mut obj = Object::new("a", OWNER).unwrap();
        obj.write_all(b"hello ").unwrap();
        obj.append(b"world").unwrap();
        assert_eq!(obj.payload(), b"hello world");

        obj.seal();
        let err = obj.write(b"!").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert!(matches!(obj.append(b"!"), Err(TypeError::Immutable(_))));
        assert!(obj.set_meta_key("color", "red").is_err());
        assert_eq!(obj.len(), 11);
    }

    #[test]
    fn set_meta_key_ignores_protected_keys() {
        let mut obj = Object::new("a", OWNER).unwrap();
        let id = obj.id().to_string();
        obj.set_meta_key(MetaKey::Id, "forged").unwrap();
        obj.set_meta_key(MetaKey::ContentType, "text/plain").unwrap();
        assert_eq!(obj.metadata().get(MetaKey::Id), Some(id.as_str()));
        assert_eq!(obj.content_type(), Some("text/plain"));
    }

    #[test]
    fn validate_checks_name_and_content_type() {
        let obj = Object::new("", OWNER).unwrap();
        assert_eq!(obj.validate(false), Err(TypeError::MissingField("name")));

        let mut obj = Object::new("a", OWNER).unwrap();
        assert_eq!(obj.validate(true), Err(TypeError::MissingField("contentType")));
        obj.set_meta_key(MetaKey::ContentType, "text/plain").unwrap();
        assert!(obj.validate(true).is_ok());
    }

    #[test]
    fn validate_limits_name_length() {
        let at_limit = Object::new("n".repeat(MAX_NAME_LEN), OWNER).unwrap();
        assert!(at_limit.validate(false).is_ok());

        let over = Object::new("n".repeat(MAX_NAME_LEN + 1), OWNER).unwrap();
        assert_eq!(
            over.validate(false),
            Err(TypeError::NameTooLong {
                len: MAX_NAME_LEN + 1,
                max: MAX_NAME_LEN
            })
        );
    }

    #[test]
    fn set_owner_is_canonicalized() {
        let mut obj = Object::new("a", "b0f2e1a8-3c62-4d0e-8f5a-7d1c2e9b4a60").unwrap();
        obj.set_meta_key(MetaKey::Owner, OWNER.to_uppercase()).unwrap();
        assert_eq!(obj.owner(), OWNER);
    }

    #[test]
    fn validate_rejects_overwritten_owner() {
        let mut obj = Object::new("a", OWNER).unwrap();
        obj.set_meta_key(MetaKey::Owner, "nobody").unwrap();
        assert!(matches!(
            obj.validate(false),
            Err(TypeError::InvalidUuid { field: "owner", .. })
        ));
    }

    #[test]
    fn from_parts_restores_sealed_object() {
        let mut obj = Object::new("a", OWNER).unwrap();
        obj.append(b"payload").unwrap();
        let restored = Object::from_parts(obj.metadata().clone(), obj.payload().to_vec()).unwrap();
        assert_eq!(restored.id(), obj.id());
        assert_eq!(restored.name(), "a");
        assert!(restored.is_immutable());

        let mut buf = String::new();
        restored.reader().read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "payload");
    }

    #[test]
    fn from_parts_requires_identity() {
        let mut meta = Metadata::new();
        meta.set(MetaKey::Name, "a");
        assert_eq!(
            Object::from_parts(meta, Vec::new()).unwrap_err(),
            TypeError::MissingField("id")
        );
    }

    #[test]
    fn debug_omits_payload() {
        let mut obj = Object::new("a", OWNER).unwrap();
        obj.append(b"secret").unwrap();
        let debug = format!("{obj:?}");
        assert!(debug.contains("size: 6"));
        assert!(!debug.contains("secret"));
    }
}
