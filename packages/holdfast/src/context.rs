use std::alloc::Layout;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::ptr::NonNull;

use negative_impl::negative_impl;
use tracing::{debug, trace};

use crate::check::violation;
use crate::{AllocContextBuilder, Allocator, ErasedAllocator, Error, Result, Violation};

thread_local! {
    /// The allocator stack of the current thread, used by "context" containers and pointers.
    static THREAD_CONTEXT: AllocContext = AllocContext::new();
}

/// An ordered, never-empty stack of allocators.
///
/// The allocator on top of the stack serves every allocation routed through the context. The
/// bottom entry is fixed when the context is created and can never be removed.
///
/// Most code uses the per-thread context through [`push_context_allocator()`] and
/// [`context_allocator()`]. An explicit instance can be created with [`AllocContext::new()`] or
/// [`AllocContext::builder()`] and passed around where hidden global state is undesirable.
///
/// # Thread safety
///
/// The stack is not synchronized. It is neither [`Send`] nor [`Sync`]; each thread has its own
/// per-thread context.
///
/// # Example
///
/// ```
/// use holdfast::{AllocContext, ErasedAllocator};
///
/// let context = AllocContext::new();
/// assert_eq!(context.depth(), 1);
///
/// let arena = ErasedAllocator::system();
///
/// {
///     let _guard = context.push(arena.clone());
///     assert_eq!(context.depth(), 2);
///     assert!(context.current().ptr_eq(&arena));
/// }
///
/// // Dropping the guard restored the previous allocator.
/// assert_eq!(context.depth(), 1);
/// ```
pub struct AllocContext {
    stack: RefCell<Vec<Entry>>,

    // Identifies entries so that a guard only ever removes the entry it pushed.
    next_id: Cell<u64>,
}

/// One allocator on the stack, tagged with an identity unique within its context.
#[derive(Debug)]
struct Entry {
    allocator: ErasedAllocator,
    id: u64,
}

impl AllocContext {
    /// Creates a context whose base entry is the host process heap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base(ErasedAllocator::system())
    }

    /// Creates a builder for configuring and constructing an [`AllocContext`].
    ///
    /// # Example
    ///
    /// ```
    /// use std::rc::Rc;
    ///
    /// use holdfast::{AllocContext, ErasedAllocator, TrackingAllocator};
    ///
    /// let base = ErasedAllocator::from_rc(Rc::new(TrackingAllocator::system()));
    /// let context = AllocContext::builder().base(base.clone()).build();
    ///
    /// assert!(context.current().ptr_eq(&base));
    /// ```
    #[inline]
    pub fn builder() -> AllocContextBuilder {
        AllocContextBuilder::new()
    }

    #[must_use]
    pub(crate) fn with_base(base: ErasedAllocator) -> Self {
        Self {
            stack: RefCell::new(vec![Entry {
                allocator: base,
                id: 0,
            }]),
            next_id: Cell::new(1),
        }
    }

    /// Makes `allocator` the current allocator until the returned guard is dropped.
    ///
    /// Dropping the guard restores the allocator that was current when `push()` was called,
    /// discarding anything pushed after it that is still on the stack.
    pub fn push(&self, allocator: ErasedAllocator) -> ContextGuard<'_> {
        let (depth, id) = self.push_entry(allocator);

        ContextGuard {
            context: self,
            depth,
            id,
        }
    }

    /// Removes the current allocator from the stack and returns it.
    ///
    /// # Panics
    ///
    /// Panics if only the base entry remains. Use [`try_pop()`][Self::try_pop] to observe this
    /// condition instead.
    #[track_caller]
    pub fn pop(&self) -> ErasedAllocator {
        self.try_pop()
            .unwrap_or_else(|_| violation(Violation::PopLastAllocator))
    }

    /// Removes the current allocator from the stack and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ContractViolation`] if only the base entry remains. The stack is left
    /// unchanged in that case.
    pub fn try_pop(&self) -> Result<ErasedAllocator> {
        let mut stack = self.stack.borrow_mut();

        if stack.len() <= 1 {
            return Err(Error::ContractViolation(Violation::PopLastAllocator));
        }

        let popped = stack
            .pop()
            .expect("length checked above, the stack has at least two entries");

        debug!(depth = stack.len(), "allocator popped from context");

        Ok(popped.allocator)
    }

    /// Returns a handle to the allocator currently on top of the stack.
    #[must_use]
    pub fn current(&self) -> ErasedAllocator {
        self.stack
            .borrow()
            .last()
            .map(|entry| entry.allocator.clone())
            .expect("an allocator context is never empty")
    }

    /// Number of allocators on the stack, including the base entry. Never zero.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.borrow().len()
    }

    /// Pushes `allocator` and returns the depth and identity of the new entry.
    fn push_entry(&self, allocator: ErasedAllocator) -> (usize, u64) {
        let id = self.next_id.get();
        self.next_id.set(id.wrapping_add(1));

        let mut stack = self.stack.borrow_mut();
        stack.push(Entry { allocator, id });

        debug!(depth = stack.len(), id, "allocator pushed onto context");

        (stack.len(), id)
    }

    /// Restores the stack to the state it was in before the entry `id` was pushed at `depth`.
    ///
    /// Does nothing if that entry is no longer on the stack.
    fn restore(&self, depth: usize, id: u64) {
        let mut stack = self.stack.borrow_mut();

        // The entry may already have been removed by an explicit pop(), and another entry may
        // have been pushed to the same depth since.
        let index = depth.wrapping_sub(1);
        let still_present = stack.get(index).is_some_and(|entry| entry.id == id);

        if still_present && depth > 1 {
            stack.truncate(index);

            debug!(depth = stack.len(), id, "allocator context restored");
        }
    }
}

impl Default for AllocContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator for AllocContext {
    /// Allocates through the allocator currently on top of the stack.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>> {
        trace!(size = layout.size(), depth = self.depth(), "context allocation");

        self.current().allocate(layout)
    }

    /// Frees through the allocator currently on top of the stack.
    ///
    /// The caller must ensure the same allocator is on top as when the memory was allocated.
    /// Containers that may outlive a stack change capture [`current()`][Self::current] instead.
    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        trace!(size = layout.size(), depth = self.depth(), "context free");

        // SAFETY: Forwarding the caller's guarantees to the current allocator.
        unsafe {
            self.current().free(ptr, layout);
        }
    }
}

impl fmt::Debug for AllocContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocContext")
            .field("stack", &self.stack.borrow())
            .field("next_id", &self.next_id.get())
            .finish()
    }
}

/// Keeps an allocator on top of an [`AllocContext`] for as long as it is alive.
///
/// Returned by [`AllocContext::push()`].
#[derive(Debug)]
#[must_use = "dropping the guard immediately restores the previous allocator"]
pub struct ContextGuard<'a> {
    context: &'a AllocContext,
    depth: usize,
    id: u64,
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        self.context.restore(self.depth, self.id);
    }
}

/// Keeps an allocator on top of the current thread's allocator context for as long as it is
/// alive.
///
/// Returned by [`push_context_allocator()`]. The guard is bound to the thread that created it.
#[derive(Debug)]
#[must_use = "dropping the guard immediately restores the previous allocator"]
pub struct ThreadContextGuard {
    depth: usize,
    id: u64,
}

#[negative_impl]
impl !Send for ThreadContextGuard {}
#[negative_impl]
impl !Sync for ThreadContextGuard {}

impl Drop for ThreadContextGuard {
    fn drop(&mut self) {
        let (depth, id) = (self.depth, self.id);

        // During thread teardown the context may already be gone, in which case there is
        // nothing left to restore.
        _ = THREAD_CONTEXT.try_with(|context| context.restore(depth, id));
    }
}

/// Executes a closure with the current thread's allocator context.
pub fn with_context<R>(f: impl FnOnce(&AllocContext) -> R) -> R {
    THREAD_CONTEXT.with(f)
}

/// Makes `allocator` the current thread's context allocator until the returned guard is dropped.
///
/// # Example
///
/// ```
/// use holdfast::{ErasedAllocator, context_allocator, push_context_allocator};
///
/// let arena = ErasedAllocator::system();
///
/// let guard = push_context_allocator(arena.clone());
/// assert!(context_allocator().ptr_eq(&arena));
///
/// drop(guard);
/// assert!(!context_allocator().ptr_eq(&arena));
/// ```
pub fn push_context_allocator(allocator: ErasedAllocator) -> ThreadContextGuard {
    let (depth, id) = with_context(|context| context.push_entry(allocator));

    ThreadContextGuard { depth, id }
}

/// Removes the current thread's context allocator and returns it.
///
/// # Panics
///
/// Panics if only the base entry of the current thread's context remains.
#[track_caller]
pub fn pop_context_allocator() -> ErasedAllocator {
    with_context(AllocContext::pop)
}

/// Returns a handle to the current thread's context allocator.
#[must_use]
pub fn context_allocator() -> ErasedAllocator {
    with_context(AllocContext::current)
}

/// Allocates through the current thread's context allocator.
///
/// # Errors
///
/// Returns [`Error::AllocationFailure`] if the current allocator cannot provide the memory.
pub fn context_alloc(layout: Layout) -> Result<NonNull<u8>> {
    with_context(|context| context.allocate(layout))
}

/// Frees through the current thread's context allocator.
///
/// # Safety
///
/// The caller must ensure that `ptr` was allocated with `layout` by the allocator that is
/// currently on top of the current thread's context.
pub unsafe fn context_free(ptr: NonNull<u8>, layout: Layout) {
    with_context(|context| {
        // SAFETY: Forwarding the caller's guarantees.
        unsafe { context.free(ptr, layout) }
    });
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::rc::Rc;

    use static_assertions::assert_not_impl_any;

    use super::*;
    use crate::TrackingAllocator;

    assert_not_impl_any!(AllocContext: Send, Sync);
    assert_not_impl_any!(ContextGuard<'static>: Send, Sync);
    assert_not_impl_any!(ThreadContextGuard: Send, Sync);

    #[test]
    fn starts_with_single_system_entry() {
        let context = AllocContext::new();

        assert_eq!(context.depth(), 1);
    }

    #[test]
    fn guard_restores_previous_allocator() {
        let context = AllocContext::new();
        let base = context.current();
        let pushed = ErasedAllocator::system();

        let guard = context.push(pushed.clone());
        assert!(context.current().ptr_eq(&pushed));

        drop(guard);
        assert!(context.current().ptr_eq(&base));
        assert_eq!(context.depth(), 1);
    }

    #[test]
    fn nested_guards_unwind_in_order() {
        let context = AllocContext::new();
        let first = ErasedAllocator::system();
        let second = ErasedAllocator::system();

        let outer = context.push(first.clone());
        let inner = context.push(second.clone());
        assert_eq!(context.depth(), 3);
        assert!(context.current().ptr_eq(&second));

        drop(inner);
        assert!(context.current().ptr_eq(&first));

        drop(outer);
        assert_eq!(context.depth(), 1);
    }

    #[test]
    fn dropping_outer_guard_first_discards_inner_entries() {
        let context = AllocContext::new();

        let outer = context.push(ErasedAllocator::system());
        let inner = context.push(ErasedAllocator::system());

        drop(outer);
        assert_eq!(context.depth(), 1);

        // The inner entry is already gone, so this must not remove the base entry.
        drop(inner);
        assert_eq!(context.depth(), 1);
    }

    #[test]
    fn explicit_pop_returns_top_entry() {
        let context = AllocContext::new();
        let pushed = ErasedAllocator::system();

        let guard = context.push(pushed.clone());
        let popped = context.pop();

        assert!(popped.ptr_eq(&pushed));
        assert_eq!(context.depth(), 1);

        // The guard's entry was popped explicitly; dropping it changes nothing.
        drop(guard);
        assert_eq!(context.depth(), 1);
    }

    #[test]
    fn stale_guard_leaves_later_entry_at_same_depth() {
        let context = AllocContext::new();
        let first = ErasedAllocator::system();
        let second = ErasedAllocator::system();

        let first_guard = context.push(first);
        _ = context.pop();

        let second_guard = context.push(second.clone());
        assert_eq!(context.depth(), 2);

        // The first guard's entry is gone; the entry now at its depth belongs to the second guard.
        drop(first_guard);
        assert_eq!(context.depth(), 2);
        assert!(context.current().ptr_eq(&second));

        drop(second_guard);
        assert_eq!(context.depth(), 1);
    }

    #[test]
    fn stale_guard_with_same_allocator_leaves_later_entry() {
        let context = AllocContext::new();
        let shared = ErasedAllocator::system();

        let first_guard = context.push(shared.clone());
        _ = context.pop();

        let second_guard = context.push(shared.clone());

        drop(first_guard);
        assert_eq!(context.depth(), 2);
        assert!(context.current().ptr_eq(&shared));

        drop(second_guard);
        assert_eq!(context.depth(), 1);
    }

    #[test]
    #[should_panic(expected = "cannot pop the last entry of the allocator stack")]
    fn popping_base_entry_panics() {
        let context = AllocContext::new();

        _ = context.pop();
    }

    #[test]
    fn try_pop_on_base_entry_reports_violation() {
        let context = AllocContext::new();

        let result = context.try_pop();

        assert!(matches!(
            result,
            Err(Error::ContractViolation(Violation::PopLastAllocator))
        ));
        assert_eq!(context.depth(), 1);
    }

    #[test]
    fn allocations_route_to_top_entry() {
        let tracker = Rc::new(TrackingAllocator::system());
        let context = AllocContext::new();
        let layout = Layout::new::<u64>();

        let _guard = context.push(ErasedAllocator::from_rc(Rc::clone(&tracker)));

        let ptr = context.allocate(layout).unwrap();
        assert_eq!(tracker.live_allocations(), 1);

        // SAFETY: Allocated above with the same layout; the same allocator is still on top.
        unsafe { context.free(ptr, layout) };
        assert_eq!(tracker.live_allocations(), 0);
    }

    #[test]
    fn thread_context_push_and_pop() {
        let depth_before = with_context(AllocContext::depth);
        let pushed = ErasedAllocator::system();

        let guard = push_context_allocator(pushed.clone());
        assert!(context_allocator().ptr_eq(&pushed));
        assert_eq!(with_context(AllocContext::depth), depth_before + 1);

        drop(guard);
        assert_eq!(with_context(AllocContext::depth), depth_before);
    }

    #[test]
    fn thread_context_explicit_pop() {
        let pushed = ErasedAllocator::system();

        let guard = push_context_allocator(pushed.clone());
        let popped = pop_context_allocator();
        assert!(popped.ptr_eq(&pushed));

        drop(guard);
    }

    #[test]
    fn thread_context_stale_guard_leaves_later_entry() {
        let tracker = Rc::new(TrackingAllocator::system());
        let depth_before = with_context(AllocContext::depth);

        let first_guard = push_context_allocator(ErasedAllocator::system());
        _ = pop_context_allocator();

        let second = ErasedAllocator::from_rc(Rc::clone(&tracker));
        let second_guard = push_context_allocator(second.clone());

        drop(first_guard);
        assert!(context_allocator().ptr_eq(&second));

        let layout = Layout::new::<u16>();
        let ptr = context_alloc(layout).unwrap();
        assert_eq!(tracker.live_allocations(), 1);

        // SAFETY: Allocated above with the same layout; the same allocator is still on top.
        unsafe { context_free(ptr, layout) };

        drop(second_guard);
        assert_eq!(with_context(AllocContext::depth), depth_before);
    }

    #[test]
    fn thread_context_alloc_and_free() {
        let tracker = Rc::new(TrackingAllocator::system());
        let layout = Layout::new::<[u32; 3]>();

        let _guard = push_context_allocator(ErasedAllocator::from_rc(Rc::clone(&tracker)));

        let ptr = context_alloc(layout).unwrap();
        assert_eq!(tracker.live_bytes(), 12);

        // SAFETY: Allocated above with the same layout; the same allocator is still on top.
        unsafe { context_free(ptr, layout) };
        assert_eq!(tracker.live_bytes(), 0);
    }

    #[test]
    fn each_thread_has_its_own_context() {
        let _guard = push_context_allocator(ErasedAllocator::system());
        let depth_here = with_context(AllocContext::depth);

        let depth_there = std::thread::spawn(|| with_context(AllocContext::depth))
            .join()
            .unwrap();

        assert_eq!(depth_there, 1);
        assert!(depth_here >= 2);
    }
}
