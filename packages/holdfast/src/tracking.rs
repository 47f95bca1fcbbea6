use std::alloc::Layout;
use std::cell::Cell;
use std::fmt;
use std::ptr::NonNull;

use crate::{Allocator, Result, SystemAllocator};

/// An allocator that counts the allocations and frees passing through it.
///
/// This wraps any [`Allocator`] while keeping the same allocation behavior, adding counters that
/// can be inspected at any time. It is mostly useful to observe which allocator a container
/// actually routed its memory through.
///
/// The counters are plain cells, so the tracker is not [`Sync`].
///
/// # Examples
///
/// ```
/// use std::rc::Rc;
///
/// use holdfast::{ContextArray, ErasedAllocator, TrackingAllocator, push_context_allocator};
///
/// let tracker = Rc::new(TrackingAllocator::system());
///
/// {
///     let _guard = push_context_allocator(ErasedAllocator::from_rc(Rc::clone(&tracker)));
///
///     let mut values = ContextArray::<u32>::default();
///     values.push(1);
///     values.push(2);
///
///     assert_eq!(tracker.live_allocations(), 1);
/// }
///
/// assert_eq!(tracker.live_allocations(), 0);
/// assert_eq!(tracker.live_bytes(), 0);
/// ```
pub struct TrackingAllocator<A: Allocator = SystemAllocator> {
    inner: A,

    allocations: Cell<u64>,
    frees: Cell<u64>,
    total_bytes: Cell<u64>,
    live_bytes: Cell<u64>,
}

impl TrackingAllocator<SystemAllocator> {
    /// Creates a tracking allocator on top of the host process heap.
    #[must_use]
    pub const fn system() -> Self {
        Self::new(SystemAllocator)
    }
}

impl<A: Allocator> TrackingAllocator<A> {
    /// Creates a tracking allocator that forwards to `inner`.
    #[must_use]
    pub const fn new(inner: A) -> Self {
        Self {
            inner,
            allocations: Cell::new(0),
            frees: Cell::new(0),
            total_bytes: Cell::new(0),
            live_bytes: Cell::new(0),
        }
    }

    /// Number of successful allocations made so far.
    #[must_use]
    pub fn allocation_count(&self) -> u64 {
        self.allocations.get()
    }

    /// Number of frees made so far.
    #[must_use]
    pub fn free_count(&self) -> u64 {
        self.frees.get()
    }

    /// Number of allocations that have not been freed yet.
    #[must_use]
    pub fn live_allocations(&self) -> u64 {
        // Cannot underflow: every free matches an earlier allocation.
        self.allocations.get().wrapping_sub(self.frees.get())
    }

    /// Bytes requested across all allocations so far.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.get()
    }

    /// Bytes currently allocated and not yet freed.
    #[must_use]
    pub fn live_bytes(&self) -> u64 {
        self.live_bytes.get()
    }
}

impl<A: Allocator> Allocator for TrackingAllocator<A> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>> {
        let ptr = self.inner.allocate(layout)?;

        let size: u64 = layout.size().try_into().expect("usize always fits into u64");
        self.allocations.set(self.allocations.get().wrapping_add(1));
        self.total_bytes.set(self.total_bytes.get().wrapping_add(size));
        self.live_bytes.set(self.live_bytes.get().wrapping_add(size));

        Ok(ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Forwarding the caller's guarantees to the wrapped allocator.
        unsafe {
            self.inner.free(ptr, layout);
        }

        let size: u64 = layout.size().try_into().expect("usize always fits into u64");
        self.frees.set(self.frees.get().wrapping_add(1));
        self.live_bytes.set(self.live_bytes.get().wrapping_sub(size));
    }
}

impl<A: Allocator> fmt::Debug for TrackingAllocator<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingAllocator")
            .field("inner", &"<allocator>")
            .field("allocations", &self.allocations.get())
            .field("frees", &self.frees.get())
            .field("total_bytes", &self.total_bytes.get())
            .field("live_bytes", &self.live_bytes.get())
            .finish()
    }
}
