#![forbid(unsafe_code)]

//! Error taxonomy for collection operations.
//!
//! Every variant is a programmer error: local, synchronous, and fatal to
//! the triggering call only. Mutating operations must raise these **before**
//! touching any collection state, so a failed call leaves the collection
//! exactly as it was (strong exception safety). None of them is retryable.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CollectionError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectionError {
    /// A raw value fed to model coercion was not a record/object.
    #[error("cannot coerce a non-record value into a model")]
    NotARecord,

    /// An element's key accessor produced no value.
    #[error("element has no derivable key at `{path}`")]
    MissingKey { path: String },

    /// An insertion would introduce a second element with the same key.
    #[error("duplicate key `{key}`")]
    DuplicateKey { key: String },

    /// A replace targeted a key that is not present.
    #[error("unknown key `{key}`")]
    UnknownKey { key: String },

    /// A dotted path string was empty or contained an empty segment.
    #[error("invalid field path `{path}`")]
    EmptyPath { path: String },
}

impl CollectionError {
    #[must_use]
    pub fn missing_key(path: impl Into<String>) -> Self {
        Self::MissingKey { path: path.into() }
    }

    #[must_use]
    pub fn duplicate_key(key: impl std::fmt::Debug) -> Self {
        Self::DuplicateKey {
            key: format!("{key:?}"),
        }
    }

    #[must_use]
    pub fn unknown_key(key: impl std::fmt::Debug) -> Self {
        Self::UnknownKey {
            key: format!("{key:?}"),
        }
    }
}
