use thiserror::Error;

/// Validation and decoding errors produced before anything touches storage.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid uuid for the field `{field}`: {value}")]
    InvalidUuid { field: &'static str, value: String },

    #[error("query has no parameters")]
    EmptyQuery,

    #[error("a `name` parameter requires an `owner` parameter")]
    NameOwnerMissing,

    #[error("object name is {len} bytes, the limit is {max}")]
    NameTooLong { len: usize, max: usize },

    #[error("object field `{0}` is missing")]
    MissingField(&'static str),

    #[error("object {0} is immutable")]
    Immutable(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
