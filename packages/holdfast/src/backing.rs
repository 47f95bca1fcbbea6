use std::alloc::Layout;
use std::fmt;
use std::ptr::{self, NonNull};

use crate::check::violation;
use crate::{
    Allocator, ErasedAllocator, Storage, SystemAllocator, Violation, allocate_or_abort,
    context_allocator,
};

/// Where the elements of a [`DynArray`][crate::DynArray] live.
///
/// A backing owns a block of memory with room for `capacity()` elements but knows nothing about
/// how many of them are initialized. The array tracks the length and is responsible for dropping
/// the elements before the backing releases its memory.
///
/// # Safety
///
/// Implementations must guarantee that:
///
/// * `as_ptr()` and `as_mut_ptr()` return a non-null pointer, aligned for `T`, to memory valid for
///   `capacity()` elements (a dangling aligned pointer when the capacity is zero).
/// * The memory and the first `len` elements passed to `grow()` are preserved across growth,
///   possibly at a new address.
/// * After `grow(len, new_capacity)` returns, `capacity() >= new_capacity`.
/// * The memory is only released in `release()` or when the backing is dropped.
pub unsafe trait Backing<T> {
    /// Number of elements the memory has room for.
    fn capacity(&self) -> usize;

    /// Address of the first element.
    fn as_ptr(&self) -> *const T;

    /// Address of the first element, valid for writes.
    fn as_mut_ptr(&mut self) -> *mut T;

    /// Makes room for at least `new_capacity` elements, relocating the first `len` elements if
    /// the memory has to move.
    ///
    /// Fixed-size backings treat a request beyond their size as a contract violation.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `len <= self.capacity()` and that exactly the first `len`
    /// elements are initialized.
    unsafe fn grow(&mut self, len: usize, new_capacity: usize);

    /// Returns the memory to its source, leaving the backing with no capacity where that is
    /// possible.
    ///
    /// # Safety
    ///
    /// The caller must ensure that no element is initialized.
    unsafe fn release(&mut self);
}

/// Layout of an array of `capacity` elements.
#[track_caller]
fn array_layout<T>(capacity: usize) -> Layout {
    Layout::array::<T>(capacity).unwrap_or_else(|_| {
        violation(Violation::CapacityOverflow {
            requested: capacity,
        })
    })
}

/// Elements in a block obtained from an allocator chosen at the type level.
///
/// The default allocator is the host process heap.
pub struct HeapBacking<T, A: Allocator = SystemAllocator> {
    /// Start of the block, or a dangling aligned pointer if the capacity is zero.
    ptr: NonNull<T>,

    /// Number of elements the block has room for.
    capacity: usize,

    /// Source of the block, which it is returned to on release.
    allocator: A,
}

impl<T, A: Allocator> HeapBacking<T, A> {
    /// Creates a backing without any memory that will allocate from `allocator` when it grows.
    #[must_use]
    pub fn new_in(allocator: A) -> Self {
        Self {
            ptr: NonNull::dangling(),
            capacity: 0,
            allocator,
        }
    }

    /// The allocator the memory comes from.
    #[must_use]
    pub fn allocator(&self) -> &A {
        &self.allocator
    }
}

impl<T, A: Allocator + Default> Default for HeapBacking<T, A> {
    fn default() -> Self {
        Self::new_in(A::default())
    }
}

// SAFETY: The block is only ever replaced in `grow()` after copying `len` elements and only
// released in `release()` and on drop. A zero capacity always pairs with a dangling pointer.
unsafe impl<T, A: Allocator> Backing<T> for HeapBacking<T, A> {
    #[inline]
    fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    #[inline]
    fn as_mut_ptr(&mut self) -> *mut T {
        self.ptr.as_ptr()
    }

    unsafe fn grow(&mut self, len: usize, new_capacity: usize) {
        if new_capacity <= self.capacity {
            return;
        }

        let new_layout = array_layout::<T>(new_capacity);
        let new_ptr = allocate_or_abort(&self.allocator, new_layout).cast::<T>();

        // SAFETY: The caller guarantees the first `len` elements of the old block are
        // initialized, the new block has room for more than `capacity >= len` elements and the
        // two blocks are distinct allocations.
        unsafe {
            ptr::copy_nonoverlapping(self.ptr.as_ptr(), new_ptr.as_ptr(), len);
        }

        let old_ptr = self.ptr;
        let old_capacity = self.capacity;

        self.ptr = new_ptr;
        self.capacity = new_capacity;

        if old_capacity > 0 {
            // SAFETY: The old block came from our allocator with this layout and its elements
            // have been moved out bitwise above.
            unsafe {
                self.allocator
                    .free(old_ptr.cast::<u8>(), array_layout::<T>(old_capacity));
            }
        }
    }

    unsafe fn release(&mut self) {
        if self.capacity == 0 {
            return;
        }

        // SAFETY: The block came from our allocator with this layout and the caller guarantees
        // that it holds no initialized elements.
        unsafe {
            self.allocator
                .free(self.ptr.cast::<u8>(), array_layout::<T>(self.capacity));
        }

        self.ptr = NonNull::dangling();
        self.capacity = 0;
    }
}

impl<T, A: Allocator> Drop for HeapBacking<T, A> {
    fn drop(&mut self) {
        // SAFETY: The owner of the backing drops any elements before the backing itself.
        unsafe {
            self.release();
        }
    }
}

impl<T, A: Allocator + fmt::Debug> fmt::Debug for HeapBacking<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapBacking")
            .field("ptr", &self.ptr)
            .field("capacity", &self.capacity)
            .field("allocator", &self.allocator)
            .finish()
    }
}

// SAFETY: The backing exclusively owns its block, like `Vec<T>`, so it may move between threads
// whenever the elements and the allocator can.
unsafe impl<T: Send, A: Allocator + Send> Send for HeapBacking<T, A> {}

// SAFETY: Shared access to the backing only grants shared access to the block.
unsafe impl<T: Sync, A: Allocator + Sync> Sync for HeapBacking<T, A> {}

/// Elements in a block obtained from the current thread's context allocator.
///
/// The allocator is captured the first time the backing grows and is used for every later
/// allocation and for the final release, regardless of what the thread's context looks like by
/// then. Releasing the memory forgets the captured allocator, so the next growth captures the
/// context allocator anew.
pub struct ContextBacking<T> {
    heap: Option<HeapBacking<T, ErasedAllocator>>,
}

impl<T> ContextBacking<T> {
    /// Creates a backing without any memory.
    #[must_use]
    pub fn new() -> Self {
        Self { heap: None }
    }

    /// The allocator the memory comes from, if any has been captured yet.
    #[must_use]
    pub fn allocator(&self) -> Option<&ErasedAllocator> {
        self.heap.as_ref().map(HeapBacking::allocator)
    }
}

impl<T> Default for ContextBacking<T> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: Delegates to `HeapBacking`, which upholds the contract. Without a heap backing the
// capacity is zero and the pointer is dangling and aligned.
unsafe impl<T> Backing<T> for ContextBacking<T> {
    #[inline]
    fn capacity(&self) -> usize {
        self.heap.as_ref().map_or(0, HeapBacking::capacity)
    }

    #[inline]
    fn as_ptr(&self) -> *const T {
        self.heap
            .as_ref()
            .map_or(ptr::dangling(), HeapBacking::as_ptr)
    }

    #[inline]
    fn as_mut_ptr(&mut self) -> *mut T {
        self.heap
            .as_mut()
            .map_or(ptr::dangling_mut(), HeapBacking::as_mut_ptr)
    }

    unsafe fn grow(&mut self, len: usize, new_capacity: usize) {
        let heap = self
            .heap
            .get_or_insert_with(|| HeapBacking::new_in(context_allocator()));

        // SAFETY: Forwarding the caller's guarantees.
        unsafe {
            heap.grow(len, new_capacity);
        }
    }

    unsafe fn release(&mut self) {
        if let Some(mut heap) = self.heap.take() {
            // SAFETY: Forwarding the caller's guarantee that no element is initialized.
            unsafe {
                heap.release();
            }
        }
    }
}

impl<T> fmt::Debug for ContextBacking<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextBacking")
            .field("capacity", &self.capacity())
            .field("allocator", &self.allocator())
            .finish()
    }
}

/// Elements stored inline, with room for exactly `N` of them.
///
/// `N` must be a power of two. The backing never allocates; growing past `N` elements is a
/// contract violation.
pub struct FixedBacking<T, const N: usize> {
    slots: [Storage<T>; N],
}

impl<T, const N: usize> FixedBacking<T, N> {
    /// Creates a backing with room for `N` elements.
    #[must_use]
    pub const fn new() -> Self {
        const {
            assert!(N.is_power_of_two(), "fixed capacity must be a power of two");
        }

        Self {
            slots: [const { Storage::uninit() }; N],
        }
    }
}

impl<T, const N: usize> Default for FixedBacking<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: The slots are part of the backing itself and never move while borrowed. Their number
// never changes, and `grow()` refuses to report a capacity beyond it.
unsafe impl<T, const N: usize> Backing<T> for FixedBacking<T, N> {
    #[inline]
    fn capacity(&self) -> usize {
        N
    }

    #[inline]
    fn as_ptr(&self) -> *const T {
        self.slots.as_ptr().cast::<T>()
    }

    #[inline]
    fn as_mut_ptr(&mut self) -> *mut T {
        self.slots.as_mut_ptr().cast::<T>()
    }

    #[track_caller]
    unsafe fn grow(&mut self, _len: usize, new_capacity: usize) {
        if new_capacity > N {
            violation(Violation::CapacityExceeded {
                requested: new_capacity,
                capacity: N,
            });
        }
    }

    unsafe fn release(&mut self) {}
}

impl<T, const N: usize> fmt::Debug for FixedBacking<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedBacking")
            .field("capacity", &N)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::{TrackingAllocator, push_context_allocator};

    assert_impl_all!(HeapBacking<u32>: Send, Sync);
    assert_impl_all!(FixedBacking<u32, 4>: Send, Sync);
    assert_not_impl_any!(ContextBacking<u32>: Send, Sync);
    assert_not_impl_any!(HeapBacking<std::cell::Cell<u32>>: Sync);

    fn fill<B: Backing<u32>>(backing: &mut B, count: usize) {
        for i in 0..count {
            // SAFETY: The caller made room for `count` elements.
            unsafe {
                backing.as_mut_ptr().add(i).write(u32::try_from(i).unwrap());
            }
        }
    }

    fn read<B: Backing<u32>>(backing: &B, count: usize) -> Vec<u32> {
        // SAFETY: The caller initialized `count` elements.
        unsafe { std::slice::from_raw_parts(backing.as_ptr(), count).to_vec() }
    }

    #[test]
    fn heap_backing_starts_empty() {
        let backing = HeapBacking::<u64>::default();

        assert_eq!(backing.capacity(), 0);
        assert!(!backing.as_ptr().is_null());
        assert_eq!(backing.as_ptr() as usize % align_of::<u64>(), 0);
    }

    #[test]
    fn heap_growth_preserves_elements() {
        let tracker = Rc::new(TrackingAllocator::system());
        let mut backing =
            HeapBacking::<u32, _>::new_in(ErasedAllocator::from_rc(Rc::clone(&tracker)));

        // SAFETY: No elements yet.
        unsafe { backing.grow(0, 4) };
        fill(&mut backing, 3);

        // SAFETY: Three elements initialized, within the capacity of four.
        unsafe { backing.grow(3, 16) };

        assert_eq!(backing.capacity(), 16);
        assert_eq!(read(&backing, 3), vec![0, 1, 2]);
        assert_eq!(tracker.allocation_count(), 2);
        assert_eq!(tracker.live_allocations(), 1);

        // SAFETY: The elements are plain integers that need no drop.
        unsafe { backing.release() };

        assert_eq!(backing.capacity(), 0);
        assert_eq!(tracker.live_allocations(), 0);
    }

    #[test]
    fn heap_growth_to_smaller_capacity_is_ignored() {
        let mut backing = HeapBacking::<u32>::default();

        // SAFETY: No elements.
        unsafe {
            backing.grow(0, 8);
            backing.grow(0, 2);
        }

        assert_eq!(backing.capacity(), 8);
    }

    #[test]
    fn dropping_heap_backing_frees_memory() {
        let tracker = Rc::new(TrackingAllocator::system());

        {
            let mut backing =
                HeapBacking::<u8, _>::new_in(ErasedAllocator::from_rc(Rc::clone(&tracker)));

            // SAFETY: No elements.
            unsafe { backing.grow(0, 32) };
        }

        assert_eq!(tracker.live_allocations(), 0);
        assert_eq!(tracker.free_count(), 1);
    }

    #[test]
    fn context_backing_captures_allocator_on_first_growth() {
        let tracker = Rc::new(TrackingAllocator::system());
        let mut backing = ContextBacking::<u32>::new();

        assert!(backing.allocator().is_none());

        {
            let _guard = push_context_allocator(ErasedAllocator::from_rc(Rc::clone(&tracker)));

            // SAFETY: No elements.
            unsafe { backing.grow(0, 4) };
        }

        fill(&mut backing, 4);

        // Growth after the context was restored keeps using the captured allocator.
        // SAFETY: Four elements initialized, within the capacity of four.
        unsafe { backing.grow(4, 8) };

        assert_eq!(tracker.allocation_count(), 2);
        assert_eq!(read(&backing, 4), vec![0, 1, 2, 3]);

        // SAFETY: The elements are plain integers that need no drop.
        unsafe { backing.release() };

        assert_eq!(tracker.live_allocations(), 0);
        assert!(backing.allocator().is_none());
    }

    #[test]
    fn fixed_backing_has_inline_capacity() {
        let mut backing = FixedBacking::<u32, 8>::new();

        assert_eq!(backing.capacity(), 8);

        fill(&mut backing, 8);

        // SAFETY: Eight elements initialized, within the capacity.
        unsafe { backing.grow(8, 8) };

        assert_eq!(read(&backing, 8), vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    #[should_panic(expected = "requested capacity 16 exceeds the fixed capacity 8")]
    fn fixed_backing_refuses_to_grow() {
        let mut backing = FixedBacking::<u32, 8>::new();

        // SAFETY: No elements.
        unsafe { backing.grow(0, 16) };
    }

    #[test]
    #[should_panic(expected = "overflows the address space")]
    fn huge_capacity_is_rejected() {
        let mut backing = HeapBacking::<u64>::default();

        // SAFETY: No elements.
        unsafe { backing.grow(0, usize::MAX / 2) };
    }
}
