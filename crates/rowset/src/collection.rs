#![forbid(unsafe_code)]

//! The array-like keyed container.
//!
//! # Design
//!
//! A [`Collection`] owns an ordered `Vec<T>` plus a [`KeyedIndex`] mapping
//! each element's derived key to its current position. Every public
//! mutation keeps the two consistent and hands the minimal batch of
//! [`ChangeRecord`]s to the collection's [`ChangeHub`] for asynchronous
//! delivery. An optional comparator makes the collection permanently
//! sorted; mutators then route insertions through a stable back-to-front
//! merge instead of positional block moves.
//!
//! # Invariants
//!
//! 1. `index.get(key(items[i])).idx == i` for every valid `i`.
//! 2. No two elements share a key; a duplicate insert is an error (a
//!    key-preserving [`replace`](Collection::replace) is not an insert).
//! 3. With a comparator installed, adjacent elements are non-decreasing.
//! 4. Every element has a derivable, non-null key.
//! 5. `items.len() == index.len()`.
//!
//! # Failure Modes
//!
//! Errors ([`CollectionError`]) are raised before any state is touched;
//! batch insertions validate every element first, so a failed call leaves
//! the collection untouched.

use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;
use std::ops::Index;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use smallvec::{SmallVec, smallvec};
use tracing::trace;

use rowset_core::{CollectionError, FieldAccess, FieldValue, Model, Path, Result};

use crate::change::ChangeRecord;
use crate::index::{EntryFlags, KeyedIndex};
use crate::observe::{ChangeBatch, ChangeHub, Scheduler, Subscription, TickScheduler};

/// Key derivation strategy: returns `None` when no key can be derived.
pub type KeyFn<T, K> = Rc<dyn Fn(&T) -> Option<K>>;

/// Total-order comparator keeping a collection permanently sorted.
pub type SortFn<T> = Rc<dyn Fn(&T, &T) -> Ordering>;

/// Outcome of [`Collection::toggle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Added,
    Removed,
}

enum InsertPos {
    Start,
    End,
    At(usize),
}

// ============================================================================
// Builder
// ============================================================================

/// Configures and constructs a [`Collection`].
pub struct CollectionBuilder<T, K = FieldValue> {
    key_fn: KeyFn<T, K>,
    key_label: String,
    sort_fn: Option<SortFn<T>>,
    scheduler: Option<Rc<dyn Scheduler>>,
}

impl<T, K> CollectionBuilder<T, K>
where
    T: Clone + 'static,
    K: Eq + Hash + Clone + fmt::Debug + 'static,
{
    /// Start a builder with an explicit key accessor.
    #[must_use]
    pub fn keyed(key_fn: impl Fn(&T) -> Option<K> + 'static) -> Self {
        Self {
            key_fn: Rc::new(key_fn),
            key_label: "<key fn>".to_owned(),
            sort_fn: None,
            scheduler: None,
        }
    }

    /// Install a comparator; the collection stays sorted by it forever.
    #[must_use]
    pub fn sorted_by(mut self, cmp: impl Fn(&T, &T) -> Ordering + 'static) -> Self {
        self.sort_fn = Some(Rc::new(cmp));
        self
    }

    /// Share a scheduler with other collections so one host tick flushes
    /// every target. Defaults to a private [`TickScheduler`].
    #[must_use]
    pub fn scheduler(mut self, scheduler: Rc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Build an empty collection.
    #[must_use]
    pub fn build(self) -> Collection<T, K> {
        let scheduler = self.scheduler.unwrap_or_else(|| TickScheduler::new());
        Collection {
            items: Vec::new(),
            index: KeyedIndex::new(),
            key_fn: self.key_fn,
            key_label: self.key_label,
            sort_fn: self.sort_fn,
            hub: ChangeHub::new(Rc::clone(&scheduler)),
            scheduler,
        }
    }

    /// Build from an initial element sequence. Equivalent to building
    /// empty and pushing every element in one batch: same error semantics,
    /// same final index state.
    pub fn build_with(self, items: impl IntoIterator<Item = T>) -> Result<Collection<T, K>> {
        let mut collection = self.build();
        collection.push(items)?;
        Ok(collection)
    }
}

impl<T> CollectionBuilder<T, FieldValue>
where
    T: FieldAccess + Clone + 'static,
{
    /// Key by a dotted field path resolved through [`FieldAccess`]. A field
    /// holding `Null` counts as no key.
    pub fn keyed_by_path(path: &str) -> Result<Self> {
        let parsed = Path::parse(path)?;
        let label = parsed.to_string();
        Ok(Self {
            key_fn: Rc::new(move |item: &T| {
                item.field(&parsed).filter(|v| *v != FieldValue::Null)
            }),
            key_label: label,
            sort_fn: None,
            scheduler: None,
        })
    }

    /// Key by the conventional `"id"` field.
    #[must_use]
    pub fn keyed_by_id() -> Self {
        match Self::keyed_by_path("id") {
            Ok(builder) => builder,
            // "id" is a single non-empty segment; parsing cannot fail.
            Err(_) => unreachable!(),
        }
    }
}

impl<T, K> CollectionBuilder<T, K>
where
    T: Model + Clone + 'static,
    K: Eq + Hash + Clone + fmt::Debug + 'static,
{
    /// Build from raw values, coercing each through [`Model`] first. The
    /// whole batch is rejected if any raw value fails to coerce.
    pub fn build_with_raw(
        self,
        raws: impl IntoIterator<Item = T::Raw>,
    ) -> Result<Collection<T, K>> {
        let items = T::coerce_all(raws)?;
        self.build_with(items)
    }
}

// ============================================================================
// Collection
// ============================================================================

/// Ordered, keyed, observable container. See the module docs.
pub struct Collection<T, K = FieldValue> {
    items: Vec<T>,
    index: KeyedIndex<K>,
    key_fn: KeyFn<T, K>,
    key_label: String,
    sort_fn: Option<SortFn<T>>,
    hub: ChangeHub<T>,
    scheduler: Rc<dyn Scheduler>,
}

impl<T, K> Collection<T, K>
where
    T: Clone + 'static,
    K: Eq + Hash + Clone + fmt::Debug + 'static,
{
    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether a comparator is installed.
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        self.sort_fn.is_some()
    }

    /// Number of entries in the key index. Always equals [`len`](Self::len)
    /// after a public operation returns.
    #[must_use]
    pub fn index_len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn at(&self, idx: usize) -> Option<&T> {
        self.items.get(idx)
    }

    /// O(1) lookup through the key index.
    #[must_use]
    pub fn by_key(&self, key: &K) -> Option<&T> {
        self.index.get(key).and_then(|ctx| self.items.get(ctx.idx))
    }

    #[must_use]
    pub fn index_of_key(&self, key: &K) -> Option<usize> {
        self.index.get(key).map(|ctx| ctx.idx)
    }

    /// Position of an element, resolved through its derived key.
    #[must_use]
    pub fn index_of(&self, item: &T) -> Option<usize> {
        (self.key_fn)(item).and_then(|k| self.index_of_key(&k))
    }

    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.index.contains(key)
    }

    #[must_use]
    pub fn contains(&self, item: &T) -> bool {
        self.index_of(item).is_some()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.items.clone()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    // ------------------------------------------------------------------
    // Entry flags
    // ------------------------------------------------------------------

    /// Auxiliary flags for the entry with `key`, if present. Flags travel
    /// with the key across every structural mutation.
    #[must_use]
    pub fn entry_flags(&self, key: &K) -> Option<EntryFlags> {
        self.index.get(key).map(|ctx| ctx.flags)
    }

    /// Set auxiliary flags for an entry. Returns `false` if the key is
    /// absent.
    pub fn set_entry_flags(&mut self, key: &K, flags: EntryFlags) -> bool {
        match self.index.get_mut(key) {
            Some(ctx) => {
                ctx.flags = flags;
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Register an observer for this collection's change batches.
    pub fn observe(&self, callback: impl Fn(&[ChangeRecord<T>]) + 'static) -> Subscription<T> {
        self.hub.observe(callback)
    }

    /// Drop every registered observer.
    pub fn unobserve_all(&self) {
        self.hub.unobserve_all();
    }

    /// Force delivery of queued change batches without waiting for the
    /// scheduler tick.
    pub fn flush_now(&self) {
        self.hub.flush_now();
    }

    #[must_use]
    pub fn has_pending_changes(&self) -> bool {
        self.hub.has_pending()
    }

    // ------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------

    /// Append a batch. Sorted collections merge instead; the whole batch
    /// is validated (derivable keys, no duplicates) before any mutation.
    pub fn push(&mut self, items: impl IntoIterator<Item = T>) -> Result<()> {
        self.add(items, InsertPos::End)
    }

    /// Prepend a batch (or merge when sorted).
    pub fn unshift(&mut self, items: impl IntoIterator<Item = T>) -> Result<()> {
        self.add(items, InsertPos::Start)
    }

    /// Insert a batch at a position, clamped to the current length (or
    /// merge when sorted).
    pub fn insert_at(&mut self, at: usize, items: impl IntoIterator<Item = T>) -> Result<()> {
        self.add(items, InsertPos::At(at))
    }

    fn add(&mut self, items: impl IntoIterator<Item = T>, pos: InsertPos) -> Result<()> {
        let mut items: Vec<T> = items.into_iter().collect();
        if items.is_empty() {
            return Ok(());
        }
        self.validate_new(&items)?;
        trace!(count = items.len(), "inserting batch");

        let batch = if let Some(cmp) = self.sort_fn.clone() {
            items.sort_by(|a, b| cmp(a, b));
            self.merge_sorted(items, &cmp)
        } else {
            let at = match pos {
                InsertPos::Start => 0,
                InsertPos::End => self.items.len(),
                InsertPos::At(i) => i.min(self.items.len()),
            };
            let added = items.clone();
            self.insert_block(at, items);
            smallvec![ChangeRecord::insert(at, added)]
        };
        self.hub.notify(batch);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Removal
    // ------------------------------------------------------------------

    /// Remove `count` elements starting at `start` (clamped). Returns the
    /// removed elements; a vacuous call removes nothing and stays silent.
    pub fn remove_at(&mut self, start: usize, count: usize) -> Vec<T> {
        if start >= self.items.len() || count == 0 {
            return Vec::new();
        }
        let count = count.min(self.items.len() - start);
        let removed = self.remove_block(start, count);
        self.hub
            .notify(smallvec![ChangeRecord::delete(start, removed.clone())]);
        removed
    }

    /// Remove the element with `key`. Absent keys are a lenient no-op:
    /// `None`, no notification.
    pub fn remove_key(&mut self, key: &K) -> Option<T> {
        let idx = self.index.get(key)?.idx;
        self.remove_at(idx, 1).pop()
    }

    /// Remove an element resolved through its derived key.
    pub fn remove_item(&mut self, item: &T) -> Option<T> {
        let key = (self.key_fn)(item)?;
        self.remove_key(&key)
    }

    /// Remove every element whose key appears in `keys`, in a single
    /// compaction pass. Adjacent removed runs merge into one record.
    pub fn remove_keys(&mut self, keys: impl IntoIterator<Item = K>) -> Vec<T> {
        let targets: AHashSet<usize> = keys
            .into_iter()
            .filter_map(|k| self.index_of_key(&k))
            .collect();
        if targets.is_empty() {
            return Vec::new();
        }
        self.remove_marked(|idx, _| targets.contains(&idx))
    }

    /// Remove every element matching the predicate, in a single
    /// left-to-right compaction pass. Retained elements keep their
    /// relative order; adjacent removed runs merge into one record.
    pub fn remove_where(&mut self, pred: impl Fn(&T) -> bool) -> Vec<T> {
        self.remove_marked(|_, item| pred(item))
    }

    fn remove_marked(&mut self, marked: impl Fn(usize, &T) -> bool) -> Vec<T> {
        let len = self.items.len();
        let mut records: ChangeBatch<T> = SmallVec::new();
        let mut run: Vec<T> = Vec::new();
        let mut run_start: Option<usize> = None;
        let mut write = 0usize;

        for read in 0..len {
            if marked(read, &self.items[read]) {
                let item = self.items[read].clone();
                if let Some(key) = (self.key_fn)(&item) {
                    self.index.remove(&key);
                }
                // Run indices are post-removal positions, so a consumer can
                // apply the records sequentially.
                if run_start.is_none() {
                    run_start = Some(write);
                }
                run.push(item);
            } else {
                if let Some(start) = run_start.take() {
                    records.push(ChangeRecord::delete(start, std::mem::take(&mut run)));
                }
                if write != read {
                    self.items.swap(write, read);
                }
                if let Some(key) = (self.key_fn)(&self.items[write]) {
                    self.index.put(key, write);
                }
                write += 1;
            }
        }
        if let Some(start) = run_start.take() {
            records.push(ChangeRecord::delete(start, std::mem::take(&mut run)));
        }
        self.items.truncate(write);

        let removed: Vec<T> = records
            .iter()
            .flat_map(|r| match r {
                ChangeRecord::Splice { removed, .. } => removed.clone(),
                ChangeRecord::Update { .. } => Vec::new(),
            })
            .collect();
        if !removed.is_empty() {
            trace!(count = removed.len(), runs = records.len(), "removed by predicate");
            self.hub.notify(records);
        }
        removed
    }

    // ------------------------------------------------------------------
    // Splice / replace / reset
    // ------------------------------------------------------------------

    /// ECMA-262-style splice: normalize `start` (negative counts from the
    /// end, both ends clamped), delete `delete_count` elements, then take
    /// in `items` — elements whose key already exists become replaces,
    /// fresh elements merge (sorted) or insert at the splice position.
    /// Returns the removed elements.
    pub fn splice(
        &mut self,
        start: isize,
        delete_count: usize,
        items: impl IntoIterator<Item = T>,
    ) -> Result<Vec<T>> {
        let len = self.items.len() as isize;
        let start = if start < 0 {
            (len + start).max(0)
        } else {
            start.min(len)
        } as usize;
        let delete_count = delete_count.min(self.items.len() - start);

        let items: Vec<T> = items.into_iter().collect();
        // Validate the whole incoming batch before mutating anything.
        let mut seen: AHashSet<K> = AHashSet::with_capacity(items.len());
        for item in &items {
            let key = self.derive_key(item)?;
            if !seen.insert(key.clone()) {
                return Err(CollectionError::duplicate_key(&key));
            }
        }

        let removed = if delete_count > 0 {
            let removed = self.remove_block(start, delete_count);
            self.hub
                .notify(smallvec![ChangeRecord::delete(start, removed.clone())]);
            removed
        } else {
            Vec::new()
        };

        let mut fresh = Vec::new();
        for item in items {
            match (self.key_fn)(&item) {
                Some(key) if self.index.contains(&key) => {
                    // Key survives the deletion: route to replace.
                    self.replace(item)?;
                }
                _ => fresh.push(item),
            }
        }
        if !fresh.is_empty() {
            self.add(fresh, InsertPos::At(start))?;
        }
        Ok(removed)
    }

    /// Replace the element carrying the same key. In place (one `Update`)
    /// when local order allows; on a sorted collection whose order would
    /// break, the element is removed and re-merged instead (two `Splice`
    /// batches). Entry flags survive either way.
    pub fn replace(&mut self, item: T) -> Result<()> {
        let key = self.derive_key(&item)?;
        let Some(ctx) = self.index.get(&key) else {
            return Err(CollectionError::unknown_key(&key));
        };
        let (idx, flags) = (ctx.idx, ctx.flags);

        if let Some(cmp) = self.sort_fn.clone() {
            let fits_left = idx == 0 || cmp(&self.items[idx - 1], &item) != Ordering::Greater;
            let fits_right =
                idx + 1 >= self.items.len() || cmp(&item, &self.items[idx + 1]) != Ordering::Greater;
            if !(fits_left && fits_right) {
                let old = self.remove_block(idx, 1);
                self.hub.notify(smallvec![ChangeRecord::delete(idx, old)]);
                let batch = self.merge_sorted(vec![item], &cmp);
                self.hub.notify(batch);
                if let Some(ctx) = self.index.get_mut(&key) {
                    ctx.flags = flags;
                }
                return Ok(());
            }
        }
        self.items[idx] = item;
        self.hub.notify(smallvec![ChangeRecord::Update { index: idx }]);
        Ok(())
    }

    /// Wholesale replace: one `Splice` covering the whole prior extent.
    /// Returns the previous elements. Validated before any mutation.
    pub fn reset(&mut self, items: impl IntoIterator<Item = T>) -> Result<Vec<T>> {
        let items: Vec<T> = items.into_iter().collect();
        let mut seen: AHashSet<K> = AHashSet::with_capacity(items.len());
        for item in &items {
            let key = self.derive_key(item)?;
            if !seen.insert(key.clone()) {
                return Err(CollectionError::duplicate_key(&key));
            }
        }
        Ok(self.apply_reset(items))
    }

    /// Equivalent to `reset([])`; silent when already empty.
    pub fn clear(&mut self) -> Vec<T> {
        self.apply_reset(Vec::new())
    }

    fn apply_reset(&mut self, mut items: Vec<T>) -> Vec<T> {
        if self.items.is_empty() && items.is_empty() {
            return Vec::new();
        }
        if let Some(cmp) = &self.sort_fn {
            let cmp = Rc::clone(cmp);
            items.sort_by(|a, b| cmp(a, b));
        }
        let old = std::mem::replace(&mut self.items, items);
        self.index.clear();
        self.reindex_from(0);
        trace!(old = old.len(), new = self.items.len(), "reset");
        self.hub.notify(smallvec![ChangeRecord::Splice {
            index: 0,
            removed: old.clone(),
            added: self.items.clone(),
        }]);
        old
    }

    // ------------------------------------------------------------------
    // Ordering
    // ------------------------------------------------------------------

    /// Install a comparator and re-sort the current contents. Emits one
    /// `Splice` over the whole extent, like a reset; entry flags are kept
    /// since membership does not change.
    pub fn sort_by(&mut self, cmp: impl Fn(&T, &T) -> Ordering + 'static) {
        let cmp: SortFn<T> = Rc::new(cmp);
        self.sort_fn = Some(Rc::clone(&cmp));
        if self.items.len() < 2 {
            return;
        }
        let old = self.items.clone();
        self.items.sort_by(|a, b| cmp(a, b));
        self.reindex_from(0);
        self.hub.notify(smallvec![ChangeRecord::Splice {
            index: 0,
            removed: old,
            added: self.items.clone(),
        }]);
    }

    /// Reverse the element order. A no-op on sorted collections (the
    /// comparator owns the order). Emits one `Update` per swapped
    /// position: front-half indices ascending, then back-half ascending,
    /// so a consumer can patch from the outside in.
    pub fn reverse(&mut self) {
        if self.sort_fn.is_some() {
            return;
        }
        let n = self.items.len();
        if n < 2 {
            return;
        }
        let half = n / 2;
        for i in 0..half {
            self.swap_positions(i, n - 1 - i);
        }
        let mut batch: ChangeBatch<T> = SmallVec::with_capacity(2 * half);
        for i in 0..half {
            batch.push(ChangeRecord::Update { index: i });
        }
        for i in (n - half)..n {
            batch.push(ChangeRecord::Update { index: i });
        }
        self.hub.notify(batch);
    }

    /// Remove the element if its key is present, insert it otherwise.
    pub fn toggle(&mut self, item: T) -> Result<Toggle> {
        let key = self.derive_key(&item)?;
        if self.index.contains(&key) {
            self.remove_key(&key);
            Ok(Toggle::Removed)
        } else {
            self.push([item])?;
            Ok(Toggle::Added)
        }
    }

    // ------------------------------------------------------------------
    // Non-mutating derivations
    // ------------------------------------------------------------------

    /// A new collection with the same options holding these elements plus
    /// `extra`. Fails on key conflicts. No mutation, no notification —
    /// neither collection's hub sees a batch.
    pub fn concat(&self, extra: impl IntoIterator<Item = T>) -> Result<Self> {
        let mut combined = self.items.clone();
        combined.extend(extra);
        let mut other = self.spawn_empty();
        other.validate_new(&combined)?;
        if let Some(cmp) = &other.sort_fn {
            let cmp = Rc::clone(cmp);
            combined.sort_by(|a, b| cmp(a, b));
        }
        other.adopt(combined);
        Ok(other)
    }

    /// A new collection with the same options holding `items[start..end]`
    /// (clamped).
    #[must_use]
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.items.len());
        let start = start.min(end);
        let mut other = self.spawn_empty();
        other.adopt(self.items[start..end].to_vec());
        other
    }

    /// Chunks of at most `n` elements; the last may be shorter. `n == 0`
    /// yields no chunks.
    #[must_use]
    pub fn split(&self, n: usize) -> Vec<Vec<T>> {
        if n == 0 {
            return Vec::new();
        }
        self.items.chunks(n).map(<[T]>::to_vec).collect()
    }

    fn spawn_empty(&self) -> Self {
        Self {
            items: Vec::new(),
            index: KeyedIndex::new(),
            key_fn: Rc::clone(&self.key_fn),
            key_label: self.key_label.clone(),
            sort_fn: self.sort_fn.clone(),
            hub: ChangeHub::new(Rc::clone(&self.scheduler)),
            scheduler: Rc::clone(&self.scheduler),
        }
    }

    /// Take ownership of pre-validated items (subset of an existing valid
    /// collection). No notification.
    fn adopt(&mut self, items: Vec<T>) {
        self.items = items;
        self.index.clear();
        self.reindex_from(0);
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    #[must_use]
    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    /// Everything but the first element.
    #[must_use]
    pub fn rest(&self) -> &[T] {
        self.items.get(1..).unwrap_or(&[])
    }

    /// Everything but the last element.
    #[must_use]
    pub fn initial(&self) -> &[T] {
        match self.items.len() {
            0 => &[],
            n => &self.items[..n - 1],
        }
    }

    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> Vec<U> {
        self.items.iter().map(f).collect()
    }

    pub fn filter(&self, mut pred: impl FnMut(&T) -> bool) -> Vec<T> {
        self.items.iter().filter(|t| pred(t)).cloned().collect()
    }

    pub fn reduce<A>(&self, init: A, f: impl FnMut(A, &T) -> A) -> A {
        self.items.iter().fold(init, f)
    }

    pub fn reduce_right<A>(&self, init: A, f: impl FnMut(A, &T) -> A) -> A {
        self.items.iter().rev().fold(init, f)
    }

    pub fn all(&self, pred: impl FnMut(&T) -> bool) -> bool {
        self.items.iter().all(pred)
    }

    pub fn any(&self, pred: impl FnMut(&T) -> bool) -> bool {
        self.items.iter().any(pred)
    }

    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<&T> {
        self.items.iter().find(|t| pred(t))
    }

    pub fn find_index(&self, pred: impl FnMut(&T) -> bool) -> Option<usize> {
        self.items.iter().position(pred)
    }

    pub fn for_each(&self, f: impl FnMut(&T)) {
        self.items.iter().for_each(f);
    }

    /// Split into `(matching, rest)`, both in collection order.
    pub fn partition(&self, mut pred: impl FnMut(&T) -> bool) -> (Vec<T>, Vec<T>) {
        self.items.iter().cloned().partition(|t| pred(t))
    }

    /// Map each element to a bucket key; last element per bucket wins.
    pub fn index_by<G: Eq + Hash>(&self, mut f: impl FnMut(&T) -> G) -> AHashMap<G, T> {
        let mut out = AHashMap::with_capacity(self.items.len());
        for item in &self.items {
            out.insert(f(item), item.clone());
        }
        out
    }

    /// Group elements by bucket key, preserving collection order within
    /// each bucket.
    pub fn group_by<G: Eq + Hash>(&self, mut f: impl FnMut(&T) -> G) -> AHashMap<G, Vec<T>> {
        let mut out: AHashMap<G, Vec<T>> = AHashMap::new();
        for item in &self.items {
            out.entry(f(item)).or_default().push(item.clone());
        }
        out
    }

    /// Count elements per bucket key.
    pub fn count_by<G: Eq + Hash>(&self, mut f: impl FnMut(&T) -> G) -> AHashMap<G, usize> {
        let mut out: AHashMap<G, usize> = AHashMap::new();
        for item in &self.items {
            *out.entry(f(item)).or_default() += 1;
        }
        out
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn derive_key(&self, item: &T) -> Result<K> {
        (self.key_fn)(item).ok_or_else(|| CollectionError::missing_key(&self.key_label))
    }

    /// Validate an incoming batch: every key derivable, none already
    /// present, none repeated within the batch.
    fn validate_new(&self, items: &[T]) -> Result<()> {
        let mut seen: AHashSet<K> = AHashSet::with_capacity(items.len());
        for item in items {
            let key = self.derive_key(item)?;
            if self.index.contains(&key) || !seen.insert(key.clone()) {
                return Err(CollectionError::duplicate_key(&key));
            }
        }
        Ok(())
    }

    /// Re-derive index positions for every element at `start..`.
    fn reindex_from(&mut self, start: usize) {
        for i in start..self.items.len() {
            if let Some(key) = (self.key_fn)(&self.items[i]) {
                self.index.put(key, i);
            }
        }
    }

    /// Open a block at `start` and write `items` into it, shifting the
    /// suffix right. Callers have already validated the keys.
    fn insert_block(&mut self, start: usize, items: Vec<T>) {
        self.items.splice(start..start, items);
        self.reindex_from(start);
    }

    /// Close a block of `count` elements at `start`, shifting the suffix
    /// left. Returns the removed elements in original order.
    fn remove_block(&mut self, start: usize, count: usize) -> Vec<T> {
        let removed: Vec<T> = self.items.drain(start..start + count).collect();
        for item in &removed {
            if let Some(key) = (self.key_fn)(item) {
                self.index.remove(&key);
            }
        }
        self.reindex_from(start);
        removed
    }

    /// Exchange two positions, keeping the index current.
    fn swap_positions(&mut self, i: usize, j: usize) {
        self.items.swap(i, j);
        if let Some(key) = (self.key_fn)(&self.items[i]) {
            self.index.put(key, i);
        }
        if let Some(key) = (self.key_fn)(&self.items[j]) {
            self.index.put(key, j);
        }
    }

    /// Merge a pre-sorted batch into the already-sorted items, back to
    /// front so writes never clobber unread cells. O(n + m); stable —
    /// incoming ties land after existing equals. Produces exactly one
    /// `Splice` per contiguous run of newly-occupied positions.
    fn merge_sorted(&mut self, incoming: Vec<T>, cmp: &SortFn<T>) -> ChangeBatch<T> {
        let old_len = self.items.len();
        let m = incoming.len();
        if m == 0 {
            return SmallVec::new();
        }
        // Placeholder growth; every placeholder cell is overwritten below.
        self.items.extend(incoming.iter().cloned());

        let mut records: Vec<ChangeRecord<T>> = Vec::new();
        let mut run: Vec<T> = Vec::new();
        let mut run_start: Option<usize> = None;
        let close_run = |records: &mut Vec<ChangeRecord<T>>, run: &mut Vec<T>, start: usize| {
            run.reverse();
            records.push(ChangeRecord::insert(start, std::mem::take(run)));
        };

        let mut i = old_len as isize - 1;
        let mut j = m as isize - 1;
        let mut w = (old_len + m) as isize - 1;
        while j >= 0 {
            let take_incoming = i < 0
                || cmp(&self.items[i as usize], &incoming[j as usize]) != Ordering::Greater;
            let w_idx = w as usize;
            if take_incoming {
                let elem = incoming[j as usize].clone();
                self.items[w_idx] = elem.clone();
                match run_start {
                    Some(start) if start == w_idx + 1 => {}
                    Some(start) => close_run(&mut records, &mut run, start),
                    None => {}
                }
                run_start = Some(w_idx);
                run.push(elem);
                j -= 1;
            } else {
                self.items[w_idx] = self.items[i as usize].clone();
                i -= 1;
            }
            w -= 1;
        }
        if let Some(start) = run_start {
            close_run(&mut records, &mut run, start);
        }
        // Runs were produced back to front.
        records.reverse();

        let first_affected = records.first().map_or(old_len, ChangeRecord::index);
        self.reindex_from(first_affected);
        records.into_iter().collect()
    }
}

impl<T, K> Collection<T, K>
where
    T: Model + Clone + 'static,
    K: Eq + Hash + Clone + fmt::Debug + 'static,
{
    /// Coerce raw values through [`Model`], then push. All-or-nothing.
    pub fn push_raw(&mut self, raws: impl IntoIterator<Item = T::Raw>) -> Result<()> {
        let items = T::coerce_all(raws)?;
        self.push(items)
    }

    /// Coerce raw values through [`Model`], then reset. All-or-nothing.
    pub fn reset_raw(&mut self, raws: impl IntoIterator<Item = T::Raw>) -> Result<Vec<T>> {
        let items = T::coerce_all(raws)?;
        self.reset(items)
    }
}

impl<T, K> Collection<T, K>
where
    T: FieldAccess + Clone + 'static,
    K: Eq + Hash + Clone + fmt::Debug + 'static,
{
    /// Resolve `path` against every element; missing fields yield `Null`.
    pub fn pluck(&self, path: &str) -> Result<Vec<FieldValue>> {
        let path = Path::parse(path)?;
        Ok(self
            .items
            .iter()
            .map(|t| t.field(&path).unwrap_or(FieldValue::Null))
            .collect())
    }

    /// [`index_by`](Self::index_by) keyed by a dotted path; missing fields
    /// bucket under `Null`.
    pub fn index_by_path(&self, path: &str) -> Result<AHashMap<FieldValue, T>> {
        let path = Path::parse(path)?;
        Ok(self.index_by(|t| t.field(&path).unwrap_or(FieldValue::Null)))
    }

    /// [`group_by`](Self::group_by) keyed by a dotted path.
    pub fn group_by_path(&self, path: &str) -> Result<AHashMap<FieldValue, Vec<T>>> {
        let path = Path::parse(path)?;
        Ok(self.group_by(|t| t.field(&path).unwrap_or(FieldValue::Null)))
    }

    /// [`count_by`](Self::count_by) keyed by a dotted path.
    pub fn count_by_path(&self, path: &str) -> Result<AHashMap<FieldValue, usize>> {
        let path = Path::parse(path)?;
        Ok(self.count_by(|t| t.field(&path).unwrap_or(FieldValue::Null)))
    }
}

impl<T, K> Index<usize> for Collection<T, K> {
    type Output = T;

    fn index(&self, idx: usize) -> &T {
        &self.items[idx]
    }
}

impl<'a, T, K> IntoIterator for &'a Collection<T, K> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T: fmt::Debug, K> fmt::Debug for Collection<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("len", &self.items.len())
            .field("sorted", &self.sort_fn.is_some())
            .field("items", &self.items)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
