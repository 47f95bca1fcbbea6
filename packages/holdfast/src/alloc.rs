use std::alloc::{Layout, handle_alloc_error};
use std::fmt;
use std::ptr::{self, NonNull};
use std::rc::Rc;

use tracing::error;

use crate::{Error, Result};

/// A source of raw memory.
///
/// This is the only capability the runtime requires from its host: hand out a block of memory
/// for a layout and take it back later. Any type implementing the two operations can be used
/// directly as a container policy or wrapped into an [`ErasedAllocator`] to be placed on an
/// [`AllocContext`][crate::AllocContext] stack.
///
/// # Example
///
/// ```
/// use std::alloc::Layout;
///
/// use holdfast::{Allocator, SystemAllocator};
///
/// let layout = Layout::new::<u64>();
/// let ptr = SystemAllocator.allocate(layout).unwrap();
///
/// // SAFETY: The memory came from the same allocator with the same layout.
/// unsafe { SystemAllocator.free(ptr, layout) };
/// ```
pub trait Allocator {
    /// Allocates a block of memory that fits `layout`.
    ///
    /// Zero-sized layouts must succeed and return a well-aligned address that is never
    /// dereferenced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailure`] if the memory cannot be provided.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>>;

    /// Returns a block of memory to the allocator.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `ptr` was returned by [`allocate()`][Self::allocate] on this
    /// same allocator with the same `layout` and has not been freed since.
    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The default allocator, delegating to the host process heap.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SystemAllocator;

impl Allocator for SystemAllocator {
    #[inline]
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>> {
        if layout.size() == 0 {
            return Ok(dangling_for(layout));
        }

        // SAFETY: The layout has a non-zero size, which is the only requirement of `alloc()`.
        let ptr = unsafe { std::alloc::alloc(layout) };

        NonNull::new(ptr).ok_or(Error::AllocationFailure { layout })
    }

    #[inline]
    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }

        // SAFETY: Forwarding the caller's guarantee that the block came from `allocate()` with
        // this layout; non-zero sizes always came from the host heap.
        unsafe {
            std::alloc::dealloc(ptr.as_ptr(), layout);
        }
    }
}

/// Type-erased handle to any [`Allocator`].
///
/// Cloning the handle is cheap and every clone refers to the same allocator instance, so memory
/// allocated through one clone may be freed through another.
///
/// The handle is reference-counted without atomics and is therefore neither [`Send`] nor
/// [`Sync`].
///
/// # Example
///
/// ```
/// use std::alloc::Layout;
/// use std::rc::Rc;
///
/// use holdfast::{Allocator, ErasedAllocator, TrackingAllocator};
///
/// let tracker = Rc::new(TrackingAllocator::system());
/// let erased = ErasedAllocator::from_rc(Rc::clone(&tracker));
///
/// let layout = Layout::new::<u32>();
/// let ptr = erased.allocate(layout).unwrap();
/// assert_eq!(tracker.live_allocations(), 1);
///
/// // SAFETY: Allocated above through a clone of the same allocator, with the same layout.
/// unsafe { erased.clone().free(ptr, layout) };
/// assert_eq!(tracker.live_allocations(), 0);
/// ```
#[derive(Clone)]
pub struct ErasedAllocator {
    inner: Rc<dyn Allocator>,
}

impl ErasedAllocator {
    /// Wraps an allocator, erasing its type.
    #[must_use]
    pub fn new<A: Allocator + 'static>(allocator: A) -> Self {
        Self {
            inner: Rc::new(allocator),
        }
    }

    /// Wraps an allocator that is already reference-counted, allowing the caller to keep a typed
    /// handle to it (for example to inspect a [`TrackingAllocator`][crate::TrackingAllocator]).
    #[must_use]
    pub fn from_rc<A: Allocator + 'static>(allocator: Rc<A>) -> Self {
        Self { inner: allocator }
    }

    /// Returns a handle to the host process heap.
    #[must_use]
    pub fn system() -> Self {
        Self::new(SystemAllocator)
    }

    /// Whether both handles refer to the same allocator instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Allocator for ErasedAllocator {
    #[inline]
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>> {
        self.inner.allocate(layout)
    }

    #[inline]
    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Forwarding the caller's guarantees to the wrapped allocator.
        unsafe {
            self.inner.free(ptr, layout);
        }
    }
}

impl fmt::Debug for ErasedAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasedAllocator")
            .field("inner", &Rc::as_ptr(&self.inner).cast::<()>())
            .finish()
    }
}

/// Moves `value` into memory obtained from `allocator` and returns its address.
///
/// Allocation failure is not recoverable here and terminates the process through
/// [`handle_alloc_error`].
///
/// # Example
///
/// ```
/// use holdfast::{SystemAllocator, delete_in, new_in};
///
/// let ptr = new_in(&SystemAllocator, String::from("boxed"));
///
/// // SAFETY: The pointer is valid and holds the value we just placed there.
/// assert_eq!(unsafe { ptr.as_ref() }, "boxed");
///
/// // SAFETY: The object came from `new_in()` with the same allocator and is not used again.
/// unsafe { delete_in(&SystemAllocator, ptr) };
/// ```
#[must_use]
pub fn new_in<T, A: Allocator + ?Sized>(allocator: &A, value: T) -> NonNull<T> {
    let ptr = allocate_or_abort(allocator, Layout::new::<T>()).cast::<T>();

    // SAFETY: The block was just allocated with the layout of `T`, so it is valid for writes.
    unsafe {
        ptr.write(value);
    }

    ptr
}

/// Drops the object at `ptr` and returns its memory to `allocator`.
///
/// # Safety
///
/// The caller must ensure that `ptr` addresses a live object created by [`new_in()`] (or
/// equivalent) with the same allocator, and that the object is not used afterwards.
pub unsafe fn delete_in<T: ?Sized, A: Allocator + ?Sized>(allocator: &A, ptr: NonNull<T>) {
    // SAFETY: The caller guarantees the object is live, so we may inspect its layout.
    let layout = Layout::for_value(unsafe { ptr.as_ref() });

    // SAFETY: The caller guarantees the object is live and will not be used again.
    unsafe {
        ptr::drop_in_place(ptr.as_ptr());
    }

    // SAFETY: The caller guarantees the memory came from this allocator with this layout.
    unsafe {
        allocator.free(ptr.cast::<u8>(), layout);
    }
}

/// Allocates through `allocator`, terminating the process if the host cannot provide memory.
pub(crate) fn allocate_or_abort<A: Allocator + ?Sized>(
    allocator: &A,
    layout: Layout,
) -> NonNull<u8> {
    match allocator.allocate(layout) {
        Ok(ptr) => ptr,
        Err(error) => {
            error!(%error, "allocation failure is not recoverable");
            handle_alloc_error(layout)
        }
    }
}

/// A well-aligned, non-null address for a zero-sized allocation.
fn dangling_for(layout: Layout) -> NonNull<u8> {
    // The alignment is never zero, so the address is never null.
    NonNull::new(ptr::without_provenance_mut::<u8>(layout.align())).unwrap_or(NonNull::dangling())
}
