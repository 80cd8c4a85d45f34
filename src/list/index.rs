use std::cmp::Ordering;

use crate::error::{OvlError, Result};

/// Ordering function shared by the list's primary order and its auxiliary indexes.
pub type CompareFn<T> = fn(&T, &T) -> Ordering;

/// Handle for an auxiliary index registered on an [`IndexedList`](super::IndexedList).
///
/// Ids are allocated from a per-list counter and never reused, so a dropped
/// id can never alias an index registered later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexId(pub(crate) u32);

/// Outcome of a binary search through an auxiliary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPosition {
    /// The key matched the element at this index position.
    Exact(usize),
    /// No match; the key would sort at this index position.
    Insert(usize),
}

impl IndexPosition {
    pub fn exact(self) -> Option<usize> {
        match self {
            IndexPosition::Exact(pos) => Some(pos),
            IndexPosition::Insert(_) => None,
        }
    }

    /// Position of the match, or of the first element sorting after the key.
    pub fn position(self) -> usize {
        match self {
            IndexPosition::Exact(pos) | IndexPosition::Insert(pos) => pos,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IndexState {
    UpToDate,
    NeedsUpdate,
}

/// A secondary ordering over the elements of a list, stored as slots into
/// the list's element vector.
pub(crate) struct AuxIndex<T> {
    pub(crate) id: IndexId,
    compare: CompareFn<T>,
    lazy: bool,
    state: IndexState,
    order: Vec<usize>,
}

impl<T> AuxIndex<T> {
    pub(crate) fn new(id: IndexId, compare: CompareFn<T>, lazy: bool) -> Self {
        AuxIndex {
            id,
            compare,
            lazy,
            state: IndexState::NeedsUpdate,
            order: Vec::new(),
        }
    }

    pub(crate) fn is_lazy(&self) -> bool {
        self.lazy
    }

    pub(crate) fn state(&self) -> IndexState {
        self.state
    }

    /// Make sure a rebuild over `len` elements will not need to allocate.
    pub(crate) fn reserve_for(&mut self, len: usize) -> Result<()> {
        let additional = len.saturating_sub(self.order.len());
        self.order.try_reserve(additional)?;
        Ok(())
    }

    /// React to a mutation of the underlying list. Eager indexes must have
    /// been sized with `reserve_for` beforehand.
    pub(crate) fn invalidate(&mut self, items: &[T]) {
        if self.lazy {
            self.state = IndexState::NeedsUpdate;
        } else {
            self.rebuild(items);
        }
    }

    pub(crate) fn set_compare(&mut self, compare: CompareFn<T>, items: &[T]) -> Result<()> {
        self.compare = compare;
        if self.lazy {
            self.state = IndexState::NeedsUpdate;
            Ok(())
        } else {
            self.reserve_for(items.len())?;
            self.rebuild(items);
            Ok(())
        }
    }

    /// Bring a lazy index up to date before it is read.
    pub(crate) fn ensure_current(&mut self, items: &[T]) -> Result<()> {
        if self.state == IndexState::NeedsUpdate {
            self.reserve_for(items.len())?;
            self.rebuild(items);
        }
        Ok(())
    }

    fn rebuild(&mut self, items: &[T]) {
        let compare = self.compare;
        self.order.clear();
        self.order.extend(0..items.len());
        // Ties fall back to list position so the result is deterministic.
        self.order
            .sort_unstable_by(|&a, &b| compare(&items[a], &items[b]).then(a.cmp(&b)));
        self.state = IndexState::UpToDate;
    }

    pub(crate) fn get<'a>(&self, items: &'a [T], position: usize) -> Result<&'a T> {
        let slot = *self.order.get(position).ok_or_else(|| {
            OvlError::NotFound(format!(
                "position {} is past the end of index {:?}",
                position, self.id
            ))
        })?;
        items.get(slot).ok_or_else(|| {
            OvlError::Corrupt(format!(
                "index {:?} refers to slot {} of a {}-element list",
                self.id,
                slot,
                items.len()
            ))
        })
    }

    pub(crate) fn search_by<F>(&self, items: &[T], mut f: F) -> Result<IndexPosition>
    where
        F: FnMut(&T) -> Ordering,
    {
        // A current index is a permutation of 0..len, so a length check is enough.
        if self.order.len() != items.len() {
            return Err(OvlError::Corrupt(format!(
                "index {:?} covers {} slots of a {}-element list",
                self.id,
                self.order.len(),
                items.len()
            )));
        }
        Ok(match self.order.binary_search_by(|&slot| f(&items[slot])) {
            Ok(pos) => IndexPosition::Exact(pos),
            Err(pos) => IndexPosition::Insert(pos),
        })
    }

    pub(crate) fn compare(&self) -> CompareFn<T> {
        self.compare
    }
}
