use std::fmt;
use std::iter::FusedIterator;
use std::mem;
use std::ops::{Deref, DerefMut, Index, IndexMut};
use std::slice;

use tracing::debug;

use crate::check::check_index;
use crate::{DynArray, DynArrayIntoIter, FixedArray, FixedBacking};

/// A sequence that keeps up to `N` elements inline and moves to the host heap once it needs more.
///
/// The move to the heap happens at most once per array. After it, the array stays on the heap
/// even if it shrinks again, including after [`clear()`][Self::clear] and
/// [`reset()`][Self::reset]. Each element is relocated exactly once during the move.
///
/// `N` must be a power of two.
///
/// # Example
///
/// ```
/// use holdfast::HybridArray;
///
/// let mut array = HybridArray::<u32, 4>::new();
/// array.extend([1, 2, 3, 4]);
/// assert!(!array.is_overflowed());
///
/// array.push(5);
/// assert!(array.is_overflowed());
/// assert_eq!(array.as_slice(), &[1, 2, 3, 4, 5]);
///
/// array.clear();
/// assert!(array.is_overflowed());
/// ```
pub struct HybridArray<T, const N: usize> {
    state: HybridState<T, N>,
}

enum HybridState<T, const N: usize> {
    Inline(FixedArray<T, N>),
    Heap(DynArray<T>),
}

impl<T, const N: usize> HybridArray<T, N> {
    /// Creates an empty array that stores its elements inline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: HybridState::Inline(FixedArray::default()),
        }
    }

    /// Creates an array of `len` default values, on the heap if `len` exceeds `N`.
    #[must_use]
    pub fn with_len(len: usize) -> Self
    where
        T: Default,
    {
        let mut array = Self::new();
        array.resize(len);
        array
    }

    /// Number of elements in the array.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use and/or infinite loop.
    #[inline]
    pub fn len(&self) -> usize {
        match &self.state {
            HybridState::Inline(inline) => inline.len(),
            HybridState::Heap(heap) => heap.len(),
        }
    }

    /// Whether the array has no elements.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of elements the array can hold without moving or growing its storage.
    ///
    /// This is `N` while the elements are inline.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        match &self.state {
            HybridState::Inline(_) => N,
            HybridState::Heap(heap) => heap.capacity(),
        }
    }

    /// Whether the elements have moved to the heap. Once true, this stays true.
    #[must_use]
    #[inline]
    pub fn is_overflowed(&self) -> bool {
        matches!(self.state, HybridState::Heap(_))
    }

    /// The elements as a slice.
    #[must_use]
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        match &self.state {
            HybridState::Inline(inline) => inline.as_slice(),
            HybridState::Heap(heap) => heap.as_slice(),
        }
    }

    /// The elements as a mutable slice.
    #[must_use]
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        match &mut self.state {
            HybridState::Inline(inline) => inline.as_mut_slice(),
            HybridState::Heap(heap) => heap.as_mut_slice(),
        }
    }

    /// Appends an element to the end, moving to the heap if the inline storage is full.
    pub fn push(&mut self, value: T) {
        match &mut self.state {
            HybridState::Inline(inline) if inline.len() < N => inline.push(value),
            _ => {
                let required = self.len().saturating_add(1);
                self.heap(required).push(value);
            }
        }
    }

    /// Removes the last element and returns it, or `None` if the array is empty.
    pub fn pop(&mut self) -> Option<T> {
        match &mut self.state {
            HybridState::Inline(inline) => inline.pop(),
            HybridState::Heap(heap) => heap.pop(),
        }
    }

    /// Drops every element at or after `len`. Nothing happens if the array is already shorter.
    pub fn truncate(&mut self, len: usize) {
        match &mut self.state {
            HybridState::Inline(inline) => inline.truncate(len),
            HybridState::Heap(heap) => heap.truncate(len),
        }
    }

    /// Changes the length to `len`, filling new positions with default values or dropping
    /// surplus elements.
    pub fn resize(&mut self, len: usize)
    where
        T: Default,
    {
        self.resize_with(len, T::default);
    }

    /// Changes the length to `len`, filling new positions with values returned by `fill` or
    /// dropping surplus elements.
    pub fn resize_with(&mut self, len: usize, fill: impl FnMut() -> T) {
        match &mut self.state {
            HybridState::Inline(inline) if len <= N => inline.resize_with(len, fill),
            _ => self.heap(len).resize_with(len, fill),
        }
    }

    /// Ensures room for at least `capacity` elements in total, moving to the heap if that is more
    /// than `N`.
    pub fn reserve(&mut self, capacity: usize) {
        match &mut self.state {
            HybridState::Inline(_) if capacity <= N => {}
            _ => self.heap(capacity).reserve(capacity),
        }
    }

    /// Drops every element, keeping the storage for reuse.
    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// Drops every element and releases any heap storage. The array stays on the heap if it has
    /// moved there before.
    pub fn reset(&mut self) {
        match &mut self.state {
            HybridState::Inline(inline) => inline.reset(),
            HybridState::Heap(heap) => heap.reset(),
        }
    }

    /// Returns the heap array, first moving the inline elements into a heap array with room for
    /// `capacity` elements if that has not happened yet.
    fn heap(&mut self, capacity: usize) -> &mut DynArray<T> {
        if let HybridState::Inline(inline) = &mut self.state {
            let inline = mem::take(inline);

            debug!(
                len = inline.len(),
                threshold = N,
                capacity,
                "hybrid array moving to the heap"
            );

            let mut heap = DynArray::with_capacity(capacity.max(inline.len()));
            heap.extend(inline);

            self.state = HybridState::Heap(heap);
        }

        let HybridState::Heap(heap) = &mut self.state else {
            unreachable!("the array was moved to the heap above");
        };

        heap
    }
}

impl<T, const N: usize> Default for HybridArray<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Deref for HybridArray<T, N> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl<T, const N: usize> DerefMut for HybridArray<T, N> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_mut_slice()
    }
}

impl<T, const N: usize> Index<usize> for HybridArray<T, N> {
    type Output = T;

    /// # Panics
    ///
    /// Panics if `index >= len`.
    #[track_caller]
    fn index(&self, index: usize) -> &Self::Output {
        check_index(index, self.len());

        // SAFETY: Just checked that the index addresses an element.
        unsafe { self.as_slice().get_unchecked(index) }
    }
}

impl<T, const N: usize> IndexMut<usize> for HybridArray<T, N> {
    /// # Panics
    ///
    /// Panics if `index >= len`.
    #[track_caller]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        check_index(index, self.len());

        // SAFETY: Just checked that the index addresses an element.
        unsafe { self.as_mut_slice().get_unchecked_mut(index) }
    }
}

impl<T: Clone, const N: usize> Clone for HybridArray<T, N> {
    fn clone(&self) -> Self {
        let state = match &self.state {
            HybridState::Inline(inline) => HybridState::Inline(inline.clone()),
            HybridState::Heap(heap) => HybridState::Heap(heap.clone()),
        };

        Self { state }
    }
}

impl<T: PartialEq<U>, U, const N: usize, const M: usize> PartialEq<HybridArray<U, M>>
    for HybridArray<T, N>
{
    fn eq(&self, other: &HybridArray<U, M>) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<T: PartialEq<U>, U, const N: usize, const M: usize> PartialEq<[U; M]> for HybridArray<T, N> {
    fn eq(&self, other: &[U; M]) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<T: Eq, const N: usize> Eq for HybridArray<T, N> {}

impl<T: fmt::Debug, const N: usize> fmt::Debug for HybridArray<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T, const N: usize> Extend<T> for HybridArray<T, N> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let iter = iter.into_iter();

        let (lower, _) = iter.size_hint();
        self.reserve(self.len().saturating_add(lower));

        for value in iter {
            self.push(value);
        }
    }
}

impl<T, const N: usize> FromIterator<T> for HybridArray<T, N> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut array = Self::new();
        array.extend(iter);
        array
    }
}

impl<'a, T, const N: usize> IntoIterator for &'a HybridArray<T, N> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, T, const N: usize> IntoIterator for &'a mut HybridArray<T, N> {
    type Item = &'a mut T;
    type IntoIter = slice::IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

impl<T, const N: usize> IntoIterator for HybridArray<T, N> {
    type Item = T;
    type IntoIter = HybridIntoIter<T, N>;

    fn into_iter(self) -> Self::IntoIter {
        let inner = match self.state {
            HybridState::Inline(inline) => HybridIntoIterState::Inline(inline.into_iter()),
            HybridState::Heap(heap) => HybridIntoIterState::Heap(heap.into_iter()),
        };

        HybridIntoIter { inner }
    }
}

/// Iterator that moves the elements out of a [`HybridArray`].
pub struct HybridIntoIter<T, const N: usize> {
    inner: HybridIntoIterState<T, N>,
}

enum HybridIntoIterState<T, const N: usize> {
    Inline(DynArrayIntoIter<T, FixedBacking<T, N>>),
    Heap(DynArrayIntoIter<T>),
}

impl<T, const N: usize> Iterator for HybridIntoIter<T, N> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            HybridIntoIterState::Inline(iter) => iter.next(),
            HybridIntoIterState::Heap(iter) => iter.next(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.inner {
            HybridIntoIterState::Inline(iter) => iter.size_hint(),
            HybridIntoIterState::Heap(iter) => iter.size_hint(),
        }
    }
}

impl<T, const N: usize> DoubleEndedIterator for HybridIntoIter<T, N> {
    fn next_back(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            HybridIntoIterState::Inline(iter) => iter.next_back(),
            HybridIntoIterState::Heap(iter) => iter.next_back(),
        }
    }
}

impl<T, const N: usize> ExactSizeIterator for HybridIntoIter<T, N> {}

impl<T, const N: usize> FusedIterator for HybridIntoIter<T, N> {}

impl<T: fmt::Debug, const N: usize> fmt::Debug for HybridIntoIter<T, N> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let remaining = match &self.inner {
            HybridIntoIterState::Inline(iter) => iter.as_slice(),
            HybridIntoIterState::Heap(iter) => iter.as_slice(),
        };

        f.debug_tuple("HybridIntoIter").field(&remaining).finish()
    }
}
