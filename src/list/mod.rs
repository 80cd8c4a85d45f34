//! Ordered, owned collection with pluggable comparators and auxiliary indexes.
//!
//! `IndexedList` keeps its elements in a single vector ordered by a primary
//! comparator, and lets callers register any number of secondary orderings
//! (auxiliary indexes) over the same elements. An index is either eager,
//! rebuilt on every mutation, or lazy, marked stale on mutation and rebuilt
//! the next time it is read.
//!
//! All positions are zero-based. Growth is reserved with `try_reserve` before
//! the list is touched, so an allocation failure leaves it unchanged.
//!
//! The list does no locking of its own; callers serialize access, typically
//! with one lock around the structure that owns the list.

mod index;

pub use index::{CompareFn, IndexId, IndexPosition};

use index::{AuxIndex, IndexState};
use std::cmp::Ordering;
use std::fmt;

use crate::error::{OvlError, Result};

/// Compares a search key against an element, ordered consistently with the
/// list's primary comparator.
pub type SearchFn<K, T> = fn(&K, &T) -> Ordering;

pub struct IndexedList<T, K: ?Sized = T> {
    items: Vec<T>,
    compare: CompareFn<T>,
    search: SearchFn<K, T>,
    /// False once `insert_at_end` has appended out of primary order.
    sorted: bool,
    indexes: Vec<AuxIndex<T>>,
    next_index_id: u32,
    /// Makes the next allocation fail, for exercising rollback paths.
    #[cfg(test)]
    fail_next_growth: bool,
}

impl<T, K: ?Sized> IndexedList<T, K> {
    /// Create an empty list. No memory is reserved until the first insert.
    pub fn new(compare: CompareFn<T>, search: SearchFn<K, T>) -> Self {
        IndexedList {
            items: Vec::new(),
            compare,
            search,
            sorted: true,
            indexes: Vec::new(),
            next_index_id: 1,
            #[cfg(test)]
            fail_next_growth: false,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Element at `position` in primary order, `None` past the end.
    pub fn get(&self, position: usize) -> Option<&T> {
        self.items.get(position)
    }

    /// Mutable access to an element. Callers must not change any field the
    /// primary comparator or an index comparator looks at.
    pub fn get_mut(&mut self, position: usize) -> Option<&mut T> {
        self.items.get_mut(position)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// Insert in primary order, after any elements that compare equal.
    pub fn insert_sorted(&mut self, item: T) -> Result<usize> {
        self.prepare_growth()?;
        self.ensure_sorted();

        let compare = self.compare;
        let position = self
            .items
            .partition_point(|existing| compare(existing, &item) != Ordering::Greater);
        self.items.insert(position, item);
        self.after_mutation();
        Ok(position)
    }

    /// Append without searching. The list is flagged unsorted if the new
    /// element breaks primary order, and re-sorted on the next binary search.
    pub fn insert_at_end(&mut self, item: T) -> Result<usize> {
        self.prepare_growth()?;

        if let Some(last) = self.items.last() {
            if (self.compare)(last, &item) == Ordering::Greater {
                self.sorted = false;
            }
        }
        self.items.push(item);
        self.after_mutation();
        Ok(self.items.len() - 1)
    }

    /// Linear lookup with the search comparator. Works in any state.
    pub fn find(&self, key: &K) -> Option<usize> {
        let search = self.search;
        self.items
            .iter()
            .position(|item| search(key, item) == Ordering::Equal)
    }

    /// Binary search when the list is in primary order, linear otherwise.
    pub fn lookup(&self, key: &K) -> Option<usize> {
        if self.sorted {
            let search = self.search;
            self.items
                .binary_search_by(|item| search(key, item).reverse())
                .ok()
        } else {
            self.find(key)
        }
    }

    /// Binary search, sorting the list first if appends left it unordered.
    pub fn search(&mut self, key: &K) -> Option<usize> {
        self.ensure_sorted();
        self.lookup(key)
    }

    /// Remove the element matching `key`, handing it back to the caller.
    pub fn remove(&mut self, key: &K) -> Option<T> {
        let position = self.search(key)?;
        self.remove_at(position)
    }

    /// Remove the element at `position`, `None` past the end.
    pub fn remove_at(&mut self, position: usize) -> Option<T> {
        if position >= self.items.len() {
            return None;
        }
        let item = self.items.remove(position);
        self.after_mutation();
        Some(item)
    }

    /// Swap in a new element at `position`, returning the old one. The
    /// replacement must compare equal to the old element under the primary
    /// comparator; auxiliary indexes are refreshed as for any mutation.
    pub fn replace_at(&mut self, position: usize, item: T) -> Result<T> {
        let len = self.items.len();
        let slot = self.items.get_mut(position).ok_or_else(|| {
            OvlError::NotFound(format!(
                "position {} is past the end of a {}-element list",
                position, len
            ))
        })?;
        if (self.compare)(slot, &item) != Ordering::Equal {
            return Err(OvlError::InvalidArgument(
                "replacement does not keep its place in primary order".to_string(),
            ));
        }
        let old = std::mem::replace(slot, item);
        self.after_mutation();
        Ok(old)
    }

    /// Register a secondary ordering. An eager index is built immediately; a
    /// lazy one is built on first read.
    pub fn add_index(&mut self, compare: CompareFn<T>, lazy: bool) -> Result<IndexId> {
        self.indexes.try_reserve(1)?;
        let id = IndexId(self.next_index_id);
        let next = self.next_index_id.checked_add(1).ok_or_else(|| {
            OvlError::OutOfMemory("index id space exhausted".to_string())
        })?;

        let mut index = AuxIndex::new(id, compare, lazy);
        if !lazy {
            index.ensure_current(&self.items)?;
        }

        self.next_index_id = next;
        self.indexes.push(index);
        Ok(id)
    }

    pub fn drop_index(&mut self, id: IndexId) -> Result<()> {
        let slot = self
            .indexes
            .iter()
            .position(|index| index.id == id)
            .ok_or_else(|| unknown_index(id))?;
        self.indexes.remove(slot);
        Ok(())
    }

    /// Element at `position` in the ordering of index `id`.
    pub fn read_index(&mut self, id: IndexId, position: usize) -> Result<&T> {
        let items = &self.items;
        let index = self
            .indexes
            .iter_mut()
            .find(|index| index.id == id)
            .ok_or_else(|| unknown_index(id))?;
        index.ensure_current(items)?;
        index.get(items, position)
    }

    /// Binary search index `id` for an element equal to `key` under the
    /// index's own comparator.
    pub fn search_index(&mut self, id: IndexId, key: &T) -> Result<IndexPosition> {
        let items = &self.items;
        let index = self
            .indexes
            .iter_mut()
            .find(|index| index.id == id)
            .ok_or_else(|| unknown_index(id))?;
        index.ensure_current(items)?;
        let compare = index.compare();
        index.search_by(items, |item| compare(item, key))
    }

    /// Binary search index `id` with a caller-supplied ordering of each
    /// element relative to the target. `f` must agree with the index order.
    pub fn search_index_by<F>(&mut self, id: IndexId, f: F) -> Result<IndexPosition>
    where
        F: FnMut(&T) -> Ordering,
    {
        let items = &self.items;
        let index = self
            .indexes
            .iter_mut()
            .find(|index| index.id == id)
            .ok_or_else(|| unknown_index(id))?;
        index.ensure_current(items)?;
        index.search_by(items, f)
    }

    /// Replace an index's comparator. Eager indexes rebuild now, lazy ones
    /// on the next read.
    pub fn change_index_sort(&mut self, id: IndexId, compare: CompareFn<T>) -> Result<()> {
        let items = &self.items;
        let index = self
            .indexes
            .iter_mut()
            .find(|index| index.id == id)
            .ok_or_else(|| unknown_index(id))?;
        index.set_compare(compare, items)
    }

    /// Whether index `id` currently reflects the list contents.
    pub fn is_index_current(&self, id: IndexId) -> Result<bool> {
        self.indexes
            .iter()
            .find(|index| index.id == id)
            .map(|index| index.state() == IndexState::UpToDate)
            .ok_or_else(|| unknown_index(id))
    }

    #[cfg(test)]
    pub(crate) fn fail_next_growth(&mut self) {
        self.fail_next_growth = true;
    }

    fn prepare_growth(&mut self) -> Result<()> {
        #[cfg(test)]
        if std::mem::take(&mut self.fail_next_growth) {
            return Err(OvlError::OutOfMemory("injected allocation failure".into()));
        }
        self.items.try_reserve(1)?;
        let new_len = self.items.len() + 1;
        for index in self.indexes.iter_mut().filter(|index| !index.is_lazy()) {
            index.reserve_for(new_len)?;
        }
        Ok(())
    }

    fn ensure_sorted(&mut self) {
        if self.sorted {
            return;
        }
        let compare = self.compare;
        self.items.sort_by(compare);
        self.sorted = true;
        self.after_mutation();
    }

    fn after_mutation(&mut self) {
        for index in self.indexes.iter_mut() {
            index.invalidate(&self.items);
        }
    }
}

fn unknown_index(id: IndexId) -> OvlError {
    OvlError::InvalidArgument(format!("no index registered with id {:?}", id))
}

impl<'a, T, K: ?Sized> IntoIterator for &'a IndexedList<T, K> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T: fmt::Debug, K: ?Sized> fmt::Debug for IndexedList<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexedList")
            .field("items", &self.items)
            .field("sorted", &self.sorted)
            .field("indexes", &self.indexes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn by_value(a: &i64, b: &i64) -> Ordering {
        a.cmp(b)
    }

    fn by_value_desc(a: &i64, b: &i64) -> Ordering {
        b.cmp(a)
    }

    fn key_by_value(key: &i64, item: &i64) -> Ordering {
        key.cmp(item)
    }

    fn new_list() -> IndexedList<i64> {
        IndexedList::new(by_value, key_by_value)
    }

    #[test]
    fn test_insert_sorted_keeps_primary_order() {
        let mut list = new_list();
        for value in [5, 1, 4, 2, 3] {
            list.insert_sorted(value).unwrap();
        }
        assert_eq!(list.as_slice(), &[1, 2, 3, 4, 5]);
        assert_eq!(list.len(), 5);
    }

    #[test]
    fn test_get_past_end_is_none() {
        let mut list = new_list();
        list.insert_sorted(7).unwrap();
        assert_eq!(list.get(0), Some(&7));
        assert_eq!(list.get(1), None);
    }

    #[test]
    fn test_search_sorts_after_out_of_order_appends() {
        let mut list = new_list();
        for value in [9, 3, 7] {
            list.insert_at_end(value).unwrap();
        }
        // Linear lookup works before sorting.
        assert_eq!(list.find(&3), Some(1));
        assert_eq!(list.lookup(&3), Some(1));

        assert_eq!(list.search(&7), Some(1));
        assert_eq!(list.as_slice(), &[3, 7, 9]);
        assert_eq!(list.search(&8), None);
    }

    #[test]
    fn test_remove_returns_element() {
        let mut list = new_list();
        for value in [1, 2, 3] {
            list.insert_sorted(value).unwrap();
        }
        assert_eq!(list.remove(&2), Some(2));
        assert_eq!(list.remove(&2), None);
        assert_eq!(list.remove_at(5), None);
        assert_eq!(list.remove_at(0), Some(1));
        assert_eq!(list.as_slice(), &[3]);
    }

    #[rstest]
    #[case::eager(false)]
    #[case::lazy(true)]
    fn test_index_reads_in_its_own_order(#[case] lazy: bool) {
        let mut list = new_list();
        let id = list.add_index(by_value_desc, lazy).unwrap();
        for value in [2, 9, 4] {
            list.insert_sorted(value).unwrap();
        }

        assert_eq!(*list.read_index(id, 0).unwrap(), 9);
        assert_eq!(*list.read_index(id, 1).unwrap(), 4);
        assert_eq!(*list.read_index(id, 2).unwrap(), 2);
        assert!(list.read_index(id, 3).unwrap_err().is_not_found());
    }

    #[test]
    fn test_lazy_index_goes_stale_and_rebuilds_on_search() {
        let mut list = new_list();
        let id = list.add_index(by_value, true).unwrap();
        assert!(!list.is_index_current(id).unwrap());

        for value in (0..10).rev() {
            list.insert_at_end(value * 10).unwrap();
        }
        assert!(!list.is_index_current(id).unwrap());

        assert_eq!(
            list.search_index(id, &40).unwrap(),
            IndexPosition::Exact(4)
        );
        assert!(list.is_index_current(id).unwrap());

        list.insert_at_end(45).unwrap();
        assert!(!list.is_index_current(id).unwrap());
        assert_eq!(
            list.search_index(id, &45).unwrap(),
            IndexPosition::Exact(5)
        );
        assert_eq!(
            list.search_index(id, &46).unwrap(),
            IndexPosition::Insert(6)
        );
    }

    #[test]
    fn test_eager_index_stays_current() {
        let mut list = new_list();
        let id = list.add_index(by_value_desc, false).unwrap();
        list.insert_sorted(1).unwrap();
        assert!(list.is_index_current(id).unwrap());
        list.remove(&1);
        assert!(list.is_index_current(id).unwrap());
    }

    #[test]
    fn test_search_index_by_reports_insertion_point() {
        let mut list = new_list();
        let id = list.add_index(by_value, true).unwrap();
        for value in [10, 20, 30] {
            list.insert_sorted(value).unwrap();
        }
        let found = list.search_index_by(id, |item| item.cmp(&25)).unwrap();
        assert_eq!(found, IndexPosition::Insert(2));
        assert_eq!(found.exact(), None);
        assert_eq!(*list.read_index(id, found.position()).unwrap(), 30);
    }

    #[test]
    fn test_drop_index_rejects_stale_id() {
        let mut list = new_list();
        let first = list.add_index(by_value, false).unwrap();
        list.drop_index(first).unwrap();

        let err = list.drop_index(first).unwrap_err();
        assert!(matches!(err, OvlError::InvalidArgument(_)));
        assert!(matches!(
            list.read_index(first, 0).unwrap_err(),
            OvlError::InvalidArgument(_)
        ));

        // A new index never reuses the dropped id.
        let second = list.add_index(by_value, false).unwrap();
        assert_ne!(first, second);
    }

    #[rstest]
    #[case::eager(false)]
    #[case::lazy(true)]
    fn test_change_index_sort(#[case] lazy: bool) {
        let mut list = new_list();
        for value in [1, 2, 3] {
            list.insert_sorted(value).unwrap();
        }
        let id = list.add_index(by_value, lazy).unwrap();
        assert_eq!(*list.read_index(id, 0).unwrap(), 1);

        list.change_index_sort(id, by_value_desc).unwrap();
        assert_eq!(list.is_index_current(id).unwrap(), !lazy);
        assert_eq!(*list.read_index(id, 0).unwrap(), 3);
    }
}
