#![forbid(unsafe_code)]

//! Core: field values, dotted-path resolution, model coercion, and errors.

pub mod error;
pub mod field;
pub mod model;

pub use error::{CollectionError, Result};
pub use field::{FieldAccess, FieldValue, Path, Record};
pub use model::Model;
