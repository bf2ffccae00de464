#![forbid(unsafe_code)]

//! Dynamic field values and dotted-path resolution.
//!
//! A [`Path`] is a parsed dotted accessor (`"user.address.city"`). Types
//! that expose fields by path implement [`FieldAccess`]; the same resolver
//! backs the string form of the collection key option and the string
//! predicates of `index_by`/`group_by`/`count_by`/`pluck`.
//!
//! [`FieldValue`] is deliberately small: every variant is `Eq + Hash + Ord`
//! so any resolved field can serve as a lookup key or a grouping bucket.
//! Floats are excluded for exactly that reason.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CollectionError, Result};

/// A dynamic record: field name to value.
pub type Record = BTreeMap<String, FieldValue>;

/// A dynamic value resolved from a field lookup.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Record(Record),
}

impl FieldValue {
    /// Build a record value from `(name, value)` pairs.
    pub fn record<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, FieldValue)>,
        S: Into<String>,
    {
        Self::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    #[must_use]
    pub fn is_record(&self) -> bool {
        matches!(self, Self::Record(_))
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
            Self::Record(_) => write!(f, "<record>"),
        }
    }
}

/// A parsed dotted field path.
///
/// Segments are non-empty; `Path::parse("")` and `Path::parse("a..b")`
/// fail with [`CollectionError::EmptyPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    /// Parse a dotted path string into segments.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(CollectionError::EmptyPath {
                path: raw.to_owned(),
            });
        }
        let segments: Vec<String> = raw.split('.').map(str::to_owned).collect();
        if segments.iter().any(String::is_empty) {
            return Err(CollectionError::EmptyPath {
                path: raw.to_owned(),
            });
        }
        Ok(Self { segments })
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

/// Field resolution by dotted path.
///
/// The single seam between the collection and its element type for every
/// string-valued accessor. Typed rows implement this by matching on segment
/// names; dynamic rows get it for free via the [`FieldValue`] impl below.
pub trait FieldAccess {
    /// Resolve `path` against this value. `None` means the path does not
    /// exist (distinct from an existing field holding `FieldValue::Null`).
    fn field(&self, path: &Path) -> Option<FieldValue>;
}

impl FieldAccess for FieldValue {
    fn field(&self, path: &Path) -> Option<FieldValue> {
        let mut current = self;
        for segment in path.segments() {
            match current {
                Self::Record(map) => current = map.get(segment)?,
                _ => return None,
            }
        }
        Some(current.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested() -> FieldValue {
        FieldValue::record([
            ("id", FieldValue::Int(7)),
            (
                "user",
                FieldValue::record([
                    ("name", FieldValue::from("ada")),
                    (
                        "address",
                        FieldValue::record([("city", FieldValue::from("london"))]),
                    ),
                ]),
            ),
        ])
    }

    #[test]
    fn parse_single_segment() {
        let p = Path::parse("id").unwrap();
        assert_eq!(p.segments(), ["id"]);
        assert_eq!(p.to_string(), "id");
    }

    #[test]
    fn parse_nested_path() {
        let p = Path::parse("user.address.city").unwrap();
        assert_eq!(p.segments().len(), 3);
    }

    #[test]
    fn parse_rejects_empty() {
        assert!(matches!(
            Path::parse(""),
            Err(CollectionError::EmptyPath { .. })
        ));
        assert!(matches!(
            Path::parse("a..b"),
            Err(CollectionError::EmptyPath { .. })
        ));
        assert!(matches!(
            Path::parse(".a"),
            Err(CollectionError::EmptyPath { .. })
        ));
    }

    #[test]
    fn resolve_top_level() {
        let v = nested();
        let p = Path::parse("id").unwrap();
        assert_eq!(v.field(&p), Some(FieldValue::Int(7)));
    }

    #[test]
    fn resolve_nested() {
        let v = nested();
        let p = Path::parse("user.address.city").unwrap();
        assert_eq!(v.field(&p), Some(FieldValue::from("london")));
    }

    #[test]
    fn resolve_missing_is_none() {
        let v = nested();
        let p = Path::parse("user.age").unwrap();
        assert_eq!(v.field(&p), None);
    }

    #[test]
    fn resolve_through_scalar_is_none() {
        let v = nested();
        // `id` is an Int; descending further must fail, not panic.
        let p = Path::parse("id.inner").unwrap();
        assert_eq!(v.field(&p), None);
    }

    #[test]
    fn field_values_order_and_hash() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(FieldValue::Int(1));
        set.insert(FieldValue::Int(1));
        set.insert(FieldValue::from("1"));
        assert_eq!(set.len(), 2);
        assert!(FieldValue::Int(1) < FieldValue::Int(2));
    }
}
