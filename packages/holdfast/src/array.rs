use std::fmt;
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut, Index, IndexMut, Range};
use std::ptr;
use std::slice;

use tracing::trace;

use crate::check::{check_index, check_range, violation};
use crate::{Backing, ContextBacking, FixedBacking, HeapBacking, Violation};

/// A growable contiguous sequence whose memory comes from a [`Backing`] chosen at the type level.
///
/// The default backing allocates from the host process heap. [`ContextArray`] allocates from the
/// current thread's allocator context and [`FixedArray`] keeps its elements inline without ever
/// allocating.
///
/// Capacity is always zero or a power of two and only decreases on [`reset()`][Self::reset].
/// Insertion and removal preserve the order of the remaining elements.
///
/// The array dereferences to a slice, so read-only slice operations such as `iter()`, `first()`,
/// `contains()` or `get_unchecked()` are available directly. Indexing with `[]` is checked.
///
/// # Examples
///
/// ```
/// use holdfast::{DynArray, dyn_array};
///
/// let mut array = DynArray::new();
/// array.reserve(3);
/// assert_eq!(array.capacity(), 4);
///
/// for value in 1..=5_u32 {
///     array.push(value);
/// }
///
/// assert_eq!(array.capacity(), 8);
/// assert_eq!(array, dyn_array![1, 2, 3, 4, 5]);
/// ```
///
/// Without any heap allocation:
///
/// ```
/// use holdfast::FixedArray;
///
/// let mut array = FixedArray::<char, 4>::default();
/// array.push('a');
/// array.push_front('b');
///
/// assert_eq!(array.as_slice(), &['b', 'a']);
/// assert_eq!(array.capacity(), 4);
/// ```
pub struct DynArray<T, B: Backing<T> = HeapBacking<T>> {
    /// Memory for `capacity()` elements, of which the first `len` are initialized.
    backing: B,

    len: usize,

    _elements: PhantomData<T>,
}

/// A [`DynArray`] whose memory comes from the current thread's allocator context.
///
/// # Example
///
/// ```
/// use std::rc::Rc;
///
/// use holdfast::{ContextArray, ErasedAllocator, TrackingAllocator, push_context_allocator};
///
/// let tracker = Rc::new(TrackingAllocator::system());
/// let _guard = push_context_allocator(ErasedAllocator::from_rc(Rc::clone(&tracker)));
///
/// let mut array = ContextArray::<u16>::default();
/// array.push(1);
///
/// assert_eq!(tracker.live_allocations(), 1);
/// ```
pub type ContextArray<T> = DynArray<T, ContextBacking<T>>;

/// A [`DynArray`] that stores up to `N` elements inline and never allocates.
///
/// `N` must be a power of two. Growing past `N` elements is a contract violation.
pub type FixedArray<T, const N: usize> = DynArray<T, FixedBacking<T, N>>;

impl<T> DynArray<T> {
    /// Creates an empty array that allocates from the host process heap once elements are added.
    #[must_use]
    pub fn new() -> Self {
        Self::with_backing(HeapBacking::default())
    }

    /// Creates an empty array with room for at least `capacity` elements.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let mut array = Self::new();
        array.reserve(capacity);
        array
    }

    /// Creates an array of `len` clones of `elem`.
    #[must_use]
    pub fn from_elem(elem: T, len: usize) -> Self
    where
        T: Clone,
    {
        let mut array = Self::with_capacity(len);
        array.resize_with(len, || elem.clone());
        array
    }
}

impl<T, B: Backing<T>> DynArray<T, B> {
    /// Creates an empty array on top of `backing`, which must not hold any elements.
    #[must_use]
    pub fn with_backing(backing: B) -> Self {
        Self {
            backing,
            len: 0,
            _elements: PhantomData,
        }
    }

    /// Number of elements in the array.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use and/or infinite loop.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the array has no elements.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of elements the array can hold without growing its storage.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.backing.capacity()
    }

    /// Size of the elements in bytes.
    #[must_use]
    #[inline]
    pub fn byte_len(&self) -> usize {
        // Cannot overflow: the elements fit in memory.
        self.len.wrapping_mul(size_of::<T>())
    }

    /// The backing the elements live in.
    #[must_use]
    pub fn backing(&self) -> &B {
        &self.backing
    }

    /// Address of the first element. Dangling but aligned if the capacity is zero.
    #[must_use]
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.backing.as_ptr()
    }

    /// Address of the first element, valid for writes up to the capacity.
    #[must_use]
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.backing.as_mut_ptr()
    }

    /// The elements as a slice.
    #[must_use]
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: The first `len` elements of the backing are initialized.
        unsafe { slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    /// The elements as a mutable slice.
    #[must_use]
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        let len = self.len;

        // SAFETY: The first `len` elements of the backing are initialized.
        unsafe { slice::from_raw_parts_mut(self.as_mut_ptr(), len) }
    }

    /// Ensures room for at least `capacity` elements in total.
    ///
    /// The capacity is rounded up to the next power of two. Nothing happens if the array already
    /// has enough room. Otherwise the elements are moved to new storage.
    ///
    /// # Panics
    ///
    /// Panics if the rounded capacity overflows or if a fixed-size backing cannot hold it.
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use and/or infinite loop.
    #[track_caller]
    pub fn reserve(&mut self, capacity: usize) {
        let current = self.backing.capacity();

        if capacity <= current {
            return;
        }

        let Some(rounded) = capacity.checked_next_power_of_two() else {
            violation(Violation::CapacityOverflow {
                requested: capacity,
            });
        };

        trace!(len = self.len, from = current, to = rounded, "growing array storage");

        // SAFETY: The first `len` elements are initialized and `len` never exceeds the capacity.
        unsafe {
            self.backing.grow(self.len, rounded);
        }
    }

    /// Appends an element to the end.
    #[track_caller]
    pub fn push(&mut self, value: T) {
        self.reserve_additional(1);

        // SAFETY: We just ensured room for one more element past the initialized ones.
        unsafe {
            self.as_mut_ptr().add(self.len).write(value);
        }

        // Cannot overflow: the capacity is above the old length.
        self.len = self.len.wrapping_add(1);
    }

    /// Inserts an element at the start, shifting every other element one position later.
    #[track_caller]
    pub fn push_front(&mut self, value: T) {
        self.insert(0, value);
    }

    /// Removes the last element and returns it, or `None` if the array is empty.
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }

        self.len = self.len.wrapping_sub(1);

        // SAFETY: The element at the old last position is initialized and no longer counted.
        Some(unsafe { self.as_ptr().add(self.len).read() })
    }

    /// Removes the first element and returns it, or `None` if the array is empty.
    pub fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }

        Some(self.remove(0))
    }

    /// Drops the last `count` elements.
    ///
    /// # Panics
    ///
    /// Panics if the array has fewer than `count` elements.
    #[track_caller]
    pub fn pop_n(&mut self, count: usize) {
        if count > self.len {
            violation(Violation::NotEnoughElements {
                requested: count,
                len: self.len,
            });
        }

        self.truncate(self.len.wrapping_sub(count));
    }

    /// Inserts an element at `index`, shifting every later element one position later.
    ///
    /// # Panics
    ///
    /// Panics if `index > len`.
    #[track_caller]
    #[expect(clippy::indexing_slicing, reason = "index is checked against the length above")]
    pub fn insert(&mut self, index: usize, value: T) {
        if index > self.len {
            violation(Violation::IndexOutOfRange {
                index,
                len: self.len,
            });
        }

        self.push(value);
        self.as_mut_slice()[index..].rotate_right(1);
    }

    /// Inserts clones of `values` at `index`, shifting every later element `values.len()`
    /// positions later.
    ///
    /// # Panics
    ///
    /// Panics if `index > len`.
    #[track_caller]
    #[expect(clippy::indexing_slicing, reason = "index is checked against the length above")]
    pub fn insert_slice(&mut self, index: usize, values: &[T])
    where
        T: Clone,
    {
        if index > self.len {
            violation(Violation::IndexOutOfRange {
                index,
                len: self.len,
            });
        }

        self.reserve_additional(values.len());

        for value in values {
            self.push(value.clone());
        }

        self.as_mut_slice()[index..].rotate_right(values.len());
    }

    /// Removes the element at `index` and returns it, shifting every later element one position
    /// earlier.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`.
    #[track_caller]
    #[expect(clippy::indexing_slicing, reason = "index is checked against the length above")]
    pub fn remove(&mut self, index: usize) -> T {
        check_index(index, self.len);

        self.as_mut_slice()[index..].rotate_left(1);
        self.len = self.len.wrapping_sub(1);

        // SAFETY: The removed element was rotated to the old last position, which is
        // initialized and no longer counted.
        unsafe { self.as_ptr().add(self.len).read() }
    }

    /// Drops the elements in `range`, shifting every later element to close the gap.
    ///
    /// # Panics
    ///
    /// Panics if the range is inverted or extends past the end of the array.
    #[track_caller]
    #[expect(clippy::indexing_slicing, reason = "range is checked against the length above")]
    pub fn remove_range(&mut self, range: Range<usize>) {
        check_range(range.start, range.end, self.len);

        // Cannot underflow: the range is checked above.
        let removed = range.end.wrapping_sub(range.start);

        self.as_mut_slice()[range.start..].rotate_left(removed);
        self.truncate(self.len.wrapping_sub(removed));
    }

    /// Drops every element at or after `len`. Nothing happens if the array is already shorter.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.len {
            return;
        }

        // SAFETY: Elements `len..self.len` are initialized; the slice stays within the backing.
        let tail = unsafe {
            ptr::slice_from_raw_parts_mut(self.as_mut_ptr().add(len), self.len.wrapping_sub(len))
        };

        // The length is lowered first so a panicking destructor cannot cause a double drop.
        self.len = len;

        // SAFETY: The tail elements are initialized and no longer counted by the array.
        unsafe {
            ptr::drop_in_place(tail);
        }
    }

    /// Changes the length to `len`, filling new positions with default values or dropping
    /// surplus elements.
    #[track_caller]
    pub fn resize(&mut self, len: usize)
    where
        T: Default,
    {
        self.resize_with(len, T::default);
    }

    /// Changes the length to `len`, filling new positions with values returned by `fill` or
    /// dropping surplus elements.
    #[track_caller]
    pub fn resize_with(&mut self, len: usize, mut fill: impl FnMut() -> T) {
        if len <= self.len {
            self.truncate(len);
            return;
        }

        self.reserve(len);

        while self.len < len {
            self.push(fill());
        }
    }

    /// Drops every element, keeping the storage for reuse.
    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// Drops every element and returns the storage to its source.
    pub fn reset(&mut self) {
        self.clear();

        // SAFETY: All elements were just dropped.
        unsafe {
            self.backing.release();
        }
    }

    /// Ensures room for `additional` elements past the current length.
    #[track_caller]
    fn reserve_additional(&mut self, additional: usize) {
        let Some(required) = self.len.checked_add(additional) else {
            violation(Violation::CapacityOverflow {
                requested: usize::MAX,
            });
        };

        self.reserve(required);
    }

    /// Takes the backing out of the array without running the array's destructor.
    fn into_backing(self) -> (B, usize) {
        let this = ManuallyDrop::new(self);

        // SAFETY: `this` is never dropped, so the backing is moved out exactly once.
        let backing = unsafe { ptr::read(&this.backing) };

        (backing, this.len)
    }
}

impl<T, B: Backing<T>> Drop for DynArray<T, B> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<T, B: Backing<T> + Default> Default for DynArray<T, B> {
    fn default() -> Self {
        Self::with_backing(B::default())
    }
}

impl<T, B: Backing<T>> Deref for DynArray<T, B> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl<T, B: Backing<T>> DerefMut for DynArray<T, B> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_mut_slice()
    }
}

impl<T, B: Backing<T>> AsRef<[T]> for DynArray<T, B> {
    fn as_ref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T, B: Backing<T>> AsMut<[T]> for DynArray<T, B> {
    fn as_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<T, B: Backing<T>> Index<usize> for DynArray<T, B> {
    type Output = T;

    /// # Panics
    ///
    /// Panics if `index >= len`.
    #[track_caller]
    fn index(&self, index: usize) -> &Self::Output {
        check_index(index, self.len);

        // SAFETY: Just checked that the index addresses an initialized element.
        unsafe { self.as_slice().get_unchecked(index) }
    }
}

impl<T, B: Backing<T>> IndexMut<usize> for DynArray<T, B> {
    /// # Panics
    ///
    /// Panics if `index >= len`.
    #[track_caller]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        check_index(index, self.len);

        // SAFETY: Just checked that the index addresses an initialized element.
        unsafe { self.as_mut_slice().get_unchecked_mut(index) }
    }
}

impl<T, B: Backing<T>> Index<Range<usize>> for DynArray<T, B> {
    type Output = [T];

    /// # Panics
    ///
    /// Panics if the range is inverted or extends past the end of the array.
    #[track_caller]
    fn index(&self, range: Range<usize>) -> &Self::Output {
        check_range(range.start, range.end, self.len);

        // SAFETY: Just checked that the range lies within the initialized elements.
        unsafe { self.as_slice().get_unchecked(range) }
    }
}

impl<T, B: Backing<T>> IndexMut<Range<usize>> for DynArray<T, B> {
    /// # Panics
    ///
    /// Panics if the range is inverted or extends past the end of the array.
    #[track_caller]
    fn index_mut(&mut self, range: Range<usize>) -> &mut Self::Output {
        check_range(range.start, range.end, self.len);

        // SAFETY: Just checked that the range lies within the initialized elements.
        unsafe { self.as_mut_slice().get_unchecked_mut(range) }
    }
}

impl<T: Clone, B: Backing<T> + Default> Clone for DynArray<T, B> {
    fn clone(&self) -> Self {
        let mut clone = Self::default();
        clone.reserve(self.len);
        clone.extend(self.iter().cloned());
        clone
    }
}

impl<T, U, B, C> PartialEq<DynArray<U, C>> for DynArray<T, B>
where
    T: PartialEq<U>,
    B: Backing<T>,
    C: Backing<U>,
{
    fn eq(&self, other: &DynArray<U, C>) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<T: PartialEq<U>, U, B: Backing<T>> PartialEq<[U]> for DynArray<T, B> {
    fn eq(&self, other: &[U]) -> bool {
        self.as_slice() == other
    }
}

impl<T: PartialEq<U>, U, B: Backing<T>, const M: usize> PartialEq<[U; M]> for DynArray<T, B> {
    fn eq(&self, other: &[U; M]) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<T: Eq, B: Backing<T>> Eq for DynArray<T, B> {}

impl<T: fmt::Debug, B: Backing<T>> fmt::Debug for DynArray<T, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T, B: Backing<T>> Extend<T> for DynArray<T, B> {
    #[track_caller]
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let iter = iter.into_iter();

        let (lower, _) = iter.size_hint();
        self.reserve(self.len.saturating_add(lower));

        for value in iter {
            self.push(value);
        }
    }
}

impl<'a, T: Copy + 'a, B: Backing<T>> Extend<&'a T> for DynArray<T, B> {
    #[track_caller]
    fn extend<I: IntoIterator<Item = &'a T>>(&mut self, iter: I) {
        self.extend(iter.into_iter().copied());
    }
}

impl<T, B: Backing<T> + Default> FromIterator<T> for DynArray<T, B> {
    #[track_caller]
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut array = Self::default();
        array.extend(iter);
        array
    }
}

impl<'a, T, B: Backing<T>> IntoIterator for &'a DynArray<T, B> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, T, B: Backing<T>> IntoIterator for &'a mut DynArray<T, B> {
    type Item = &'a mut T;
    type IntoIter = slice::IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

impl<T, B: Backing<T>> IntoIterator for DynArray<T, B> {
    type Item = T;
    type IntoIter = DynArrayIntoIter<T, B>;

    fn into_iter(self) -> Self::IntoIter {
        let (backing, len) = self.into_backing();

        DynArrayIntoIter {
            backing,
            front: 0,
            back: len,
            _elements: PhantomData,
        }
    }
}

/// Iterator that moves the elements out of a [`DynArray`].
///
/// Elements that are not consumed are dropped together with the iterator.
pub struct DynArrayIntoIter<T, B: Backing<T> = HeapBacking<T>> {
    backing: B,

    /// Elements `front..back` are initialized and not yet yielded.
    front: usize,
    back: usize,

    _elements: PhantomData<T>,
}

impl<T, B: Backing<T>> DynArrayIntoIter<T, B> {
    fn remaining(&self) -> usize {
        // Cannot underflow: `front` never passes `back`.
        self.back.wrapping_sub(self.front)
    }

    /// The elements that have not been yielded yet.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: Elements `front..back` are initialized.
        unsafe {
            slice::from_raw_parts(
                self.backing.as_ptr().add(self.front),
                self.remaining(),
            )
        }
    }
}

impl<T, B: Backing<T>> Iterator for DynArrayIntoIter<T, B> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.front == self.back {
            return None;
        }

        // SAFETY: The element at `front` is initialized and we stop counting it below.
        let value = unsafe { self.backing.as_ptr().add(self.front).read() };
        self.front = self.front.wrapping_add(1);

        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

impl<T, B: Backing<T>> DoubleEndedIterator for DynArrayIntoIter<T, B> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.front == self.back {
            return None;
        }

        self.back = self.back.wrapping_sub(1);

        // SAFETY: The element at the old `back - 1` is initialized and no longer counted.
        Some(unsafe { self.backing.as_ptr().add(self.back).read() })
    }
}

impl<T, B: Backing<T>> ExactSizeIterator for DynArrayIntoIter<T, B> {}

impl<T, B: Backing<T>> FusedIterator for DynArrayIntoIter<T, B> {}

impl<T, B: Backing<T>> Drop for DynArrayIntoIter<T, B> {
    fn drop(&mut self) {
        // SAFETY: Elements `front..back` are initialized and are never yielded after this.
        let remaining = unsafe {
            ptr::slice_from_raw_parts_mut(
                self.backing.as_mut_ptr().add(self.front),
                self.remaining(),
            )
        };

        self.front = self.back;

        // SAFETY: The remaining elements are initialized and no longer counted.
        unsafe {
            ptr::drop_in_place(remaining);
        }

        // The backing releases its memory when it is dropped after us.
    }
}

impl<T: fmt::Debug, B: Backing<T>> fmt::Debug for DynArrayIntoIter<T, B> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DynArrayIntoIter").field(&self.as_slice()).finish()
    }
}

/// Creates a [`DynArray`] on the host process heap, with the same forms as `vec![]`.
///
/// # Examples
///
/// ```
/// use holdfast::dyn_array;
///
/// let listed = dyn_array![1, 2, 3];
/// assert_eq!(listed, [1, 2, 3]);
///
/// let repeated = dyn_array!["x"; 4];
/// assert_eq!(repeated.len(), 4);
///
/// let empty: holdfast::DynArray<u8> = dyn_array![];
/// assert!(empty.is_empty());
/// ```
#[macro_export]
macro_rules! dyn_array {
    () => {
        $crate::DynArray::new()
    };
    ($elem:expr; $len:expr) => {
        $crate::DynArray::from_elem($elem, $len)
    };
    ($($value:expr),+ $(,)?) => {
        <$crate::DynArray<_> as ::core::iter::FromIterator<_>>::from_iter([$($value),+])
    };
}
