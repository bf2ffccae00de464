#![forbid(unsafe_code)]

//! Change records: the wire format between a collection and its observers.
//!
//! Each mutation computes the minimal batch of records a consumer needs to
//! patch a derived view incrementally, without re-scanning the collection.
//! Records are ephemeral: produced by one mutation, consumed by one flush.

/// A single change to a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeRecord<T> {
    /// A contiguous run of positions was replaced. `removed` and `added`
    /// may independently be empty (pure delete / pure insert), never both.
    Splice {
        /// Position of the first affected slot.
        index: usize,
        /// Elements that previously occupied the run, in original order.
        removed: Vec<T>,
        /// Elements now occupying the run, in collection order.
        added: Vec<T>,
    },
    /// The content at a single existing position changed in place, with no
    /// net membership change (in-place replace, reversal swap).
    Update { index: usize },
}

impl<T> ChangeRecord<T> {
    #[must_use]
    pub fn insert(index: usize, added: Vec<T>) -> Self {
        Self::Splice {
            index,
            removed: Vec::new(),
            added,
        }
    }

    #[must_use]
    pub fn delete(index: usize, removed: Vec<T>) -> Self {
        Self::Splice {
            index,
            removed,
            added: Vec::new(),
        }
    }

    /// Number of elements added by this record (0 for `Update`).
    #[must_use]
    pub fn added_count(&self) -> usize {
        match self {
            Self::Splice { added, .. } => added.len(),
            Self::Update { .. } => 0,
        }
    }

    /// Position the record applies at.
    #[must_use]
    pub fn index(&self) -> usize {
        match self {
            Self::Splice { index, .. } | Self::Update { index } => *index,
        }
    }

    #[must_use]
    pub fn is_splice(&self) -> bool {
        matches!(self, Self::Splice { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors() {
        let ins: ChangeRecord<u32> = ChangeRecord::insert(3, vec![6, 7]);
        assert_eq!(ins.index(), 3);
        assert_eq!(ins.added_count(), 2);
        assert!(ins.is_splice());

        let del: ChangeRecord<u32> = ChangeRecord::delete(1, vec![9]);
        assert_eq!(del.added_count(), 0);
        match del {
            ChangeRecord::Splice { removed, added, .. } => {
                assert_eq!(removed, vec![9]);
                assert!(added.is_empty());
            }
            ChangeRecord::Update { .. } => panic!("expected splice"),
        }
    }

    #[test]
    fn update_shape() {
        let up: ChangeRecord<u32> = ChangeRecord::Update { index: 5 };
        assert_eq!(up.index(), 5);
        assert_eq!(up.added_count(), 0);
        assert!(!up.is_splice());
    }
}
