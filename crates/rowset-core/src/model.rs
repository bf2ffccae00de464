#![forbid(unsafe_code)]

//! Model coercion: turning raw input into a collection's element type.
//!
//! The collection accepts already-typed elements directly; [`Model`] is the
//! seam for callers feeding it raw records (deserialized payloads, dynamic
//! rows). Coercion is all-or-nothing: a batch with one bad raw value must
//! fail before any element is admitted.

use crate::error::{CollectionError, Result};
use crate::field::{FieldValue, Record};

/// Coercion from a raw representation into the element type.
///
/// The identity-style impl for dynamic rows lives on [`FieldValue`]: any
/// `Record` passes through unchanged, anything else is rejected with
/// [`CollectionError::NotARecord`].
pub trait Model: Sized {
    type Raw;

    /// Coerce one raw value. Must not partially construct on failure.
    fn coerce(raw: Self::Raw) -> Result<Self>;

    /// Coerce a whole batch, failing on the first bad value.
    fn coerce_all<I>(raws: I) -> Result<Vec<Self>>
    where
        I: IntoIterator<Item = Self::Raw>,
    {
        raws.into_iter().map(Self::coerce).collect()
    }
}

impl Model for FieldValue {
    type Raw = FieldValue;

    fn coerce(raw: FieldValue) -> Result<Self> {
        if raw.is_record() {
            Ok(raw)
        } else {
            Err(CollectionError::NotARecord)
        }
    }
}

impl Model for Record {
    type Raw = FieldValue;

    fn coerce(raw: FieldValue) -> Result<Self> {
        match raw {
            FieldValue::Record(map) => Ok(map),
            _ => Err(CollectionError::NotARecord),
        }
    }
}
