#![forbid(unsafe_code)]

//! Indexed observable collection.
//!
//! An ordered, array-like container that keeps an O(1) key index over its
//! elements, optionally maintains a permanent sort order, and describes
//! every mutation as a minimal batch of [`ChangeRecord`]s delivered to
//! observers at the next scheduler tick. Consumers (typically a grid or
//! table renderer) apply the records as incremental patches instead of
//! re-reading the whole collection.
//!
//! ```
//! use rowset::{ChangeRecord, CollectionBuilder};
//!
//! let mut rows = CollectionBuilder::keyed(|row: &(u32, &str)| Some(row.0))
//!     .sorted_by(|a, b| a.0.cmp(&b.0))
//!     .build();
//! rows.push([(5, "e"), (1, "a"), (3, "c")]).unwrap();
//!
//! assert_eq!(rows.at(1), Some(&(3, "c")));
//! assert_eq!(rows.index_of_key(&5), Some(2));
//! ```

pub mod change;
pub mod collection;
pub mod index;
pub mod observe;

pub use change::ChangeRecord;
pub use collection::{Collection, CollectionBuilder, Toggle};
pub use index::{EntryCtx, EntryFlags, KeyedIndex};
pub use observe::{ChangeBatch, ChangeHub, Scheduler, Subscription, TickScheduler};
pub use rowset_core::{CollectionError, FieldAccess, FieldValue, Model, Path, Record, Result};
