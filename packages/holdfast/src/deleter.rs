use std::fmt;
use std::ptr::{self, NonNull};

use crate::{ErasedAllocator, context_allocator, delete_in};

/// Destruction policy of an ownership handle.
///
/// A [`Unique`][crate::Unique] or [`Shared`][crate::Shared] handle calls the policy exactly once,
/// when the last owner of a non-null resource lets go of it.
///
/// Any `Box<D>` of a policy is itself a policy, so `Box<dyn Deleter<T>>` can be used where the
/// policy must be chosen at runtime.
pub trait Deleter<T: ?Sized> {
    /// Destroys the resource at `ptr`.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `ptr` addresses a live resource that this policy is able to
    /// destroy (for example, one allocated in the way the policy expects) and that the resource
    /// is not used afterwards.
    unsafe fn delete(&mut self, ptr: NonNull<T>);
}

impl<T: ?Sized, D: Deleter<T> + ?Sized> Deleter<T> for Box<D> {
    #[inline]
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        // SAFETY: Forwarding the caller's guarantees.
        unsafe {
            (**self).delete(ptr);
        }
    }
}

/// Drops the resource and returns its memory to the host heap, as [`Box`] would.
///
/// This is the default policy. Resources must have been allocated as a [`Box`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DefaultDelete;

impl<T: ?Sized> Deleter<T> for DefaultDelete {
    #[inline]
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        // SAFETY: The caller guarantees the resource is a live Box allocation not used again.
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    }
}

/// Drops the resource in place without releasing its memory.
///
/// Useful when the memory is owned by something else, such as a buffer or an arena.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NoFreeDelete;

impl<T: ?Sized> Deleter<T> for NoFreeDelete {
    #[inline]
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        // SAFETY: The caller guarantees the resource is live and not used again.
        unsafe {
            ptr::drop_in_place(ptr.as_ptr());
        }
    }
}

/// Drops the resource and returns its memory to the allocator that provided it.
///
/// The allocator is captured when the policy is created, so the resource is released through
/// the right allocator even if the thread's allocator context has changed in the meantime.
#[derive(Clone, Debug)]
pub struct ContextDelete {
    allocator: ErasedAllocator,
}

impl ContextDelete {
    /// Creates a policy that releases memory through `allocator`.
    #[must_use]
    pub fn new(allocator: ErasedAllocator) -> Self {
        Self { allocator }
    }

    /// Creates a policy bound to the current thread's context allocator.
    #[must_use]
    pub fn current() -> Self {
        Self::new(context_allocator())
    }

    /// The allocator the policy releases memory through.
    #[must_use]
    pub fn allocator(&self) -> &ErasedAllocator {
        &self.allocator
    }
}

impl Default for ContextDelete {
    fn default() -> Self {
        Self::current()
    }
}

impl<T: ?Sized> Deleter<T> for ContextDelete {
    #[inline]
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        // SAFETY: The caller guarantees the resource is live, was allocated through our
        // allocator and is not used again.
        unsafe {
            delete_in(&self.allocator, ptr);
        }
    }
}

/// Adapts a closure into a destruction policy.
///
/// # Example
///
/// ```
/// use std::cell::Cell;
/// use std::ptr::NonNull;
///
/// use holdfast::{DeleteFn, Unique};
///
/// let calls = Cell::new(0);
/// let boxed = Box::new(5_u32);
///
/// {
///     let deleter = DeleteFn(|ptr: NonNull<u32>| {
///         calls.set(calls.get() + 1);
///         // SAFETY: The pointer came from Box::into_raw below.
///         drop(unsafe { Box::from_raw(ptr.as_ptr()) });
///     });
///
///     // SAFETY: The pointer is a live Box allocation, which the closure knows how to release.
///     let _owned = unsafe { Unique::from_raw(NonNull::from(Box::leak(boxed)), deleter) };
/// }
///
/// assert_eq!(calls.get(), 1);
/// ```
#[derive(Clone, Copy)]
pub struct DeleteFn<F>(pub F);

impl<T: ?Sized, F: FnMut(NonNull<T>)> Deleter<T> for DeleteFn<F> {
    #[inline]
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        (self.0)(ptr);
    }
}

impl<F> fmt::Debug for DeleteFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DeleteFn").field(&"<closure>").finish()
    }
}
