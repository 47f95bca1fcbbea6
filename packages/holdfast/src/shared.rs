use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr::{self, NonNull};

use crate::check::violation;
use crate::unique::{ObjectIdentity, thin};
use crate::{
    ContextDelete, DefaultDelete, Deleter, SystemAllocator, Unique, Violation, delete_in, new_in,
};

/// Reference-counted handle that shares ownership of a resource between any number of owners.
///
/// Cloning a handle adds an owner. The [`Deleter`] runs exactly once, when the last owner of a
/// resource lets go of it. The owner count lives in a separate cell on the host heap.
///
/// The count is not synchronized, so the handle is neither [`Send`] nor [`Sync`].
///
/// # Examples
///
/// ```
/// use holdfast::Shared;
///
/// let first = Shared::new(vec![1, 2, 3]);
/// let second = first.clone();
/// assert_eq!(first.use_count(), 2);
///
/// drop(first);
///
/// assert_eq!(second.use_count(), 1);
/// assert_eq!(*second, vec![1, 2, 3]);
/// ```
pub struct Shared<T: ?Sized, D: Deleter<T> = DefaultDelete> {
    state: Option<SharedState<T>>,
    deleter: D,

    _owns: PhantomData<T>,
}

/// The resource of a non-null handle together with its owner count.
struct SharedState<T: ?Sized> {
    ptr: NonNull<T>,
    count: NonNull<Cell<usize>>,
}

impl<T: ?Sized> Clone for SharedState<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for SharedState<T> {}

impl<T: ?Sized> SharedState<T> {
    /// Starts a fresh owner count of one for the resource at `ptr`.
    fn adopt(ptr: NonNull<T>) -> Self {
        Self {
            ptr,
            count: new_in(&SystemAllocator, Cell::new(1)),
        }
    }

    fn count(&self) -> &Cell<usize> {
        // SAFETY: The count cell lives for as long as any handle refers to this state.
        unsafe { self.count.as_ref() }
    }
}

impl<T> Shared<T> {
    /// Moves `value` to the host heap and becomes its first owner.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }
}

impl<T: ?Sized> Shared<T> {
    /// Becomes the first owner of a boxed resource.
    #[must_use]
    pub fn from_box(value: Box<T>) -> Self {
        // SAFETY: A leaked Box is exactly what DefaultDelete releases.
        unsafe { Self::from_raw(NonNull::from(Box::leak(value)), DefaultDelete) }
    }
}

impl<T: ?Sized, D: Deleter<T>> Shared<T, D> {
    /// Creates a handle that owns nothing.
    #[must_use]
    pub fn null() -> Self
    where
        D: Default,
    {
        Self::null_with(D::default())
    }

    /// Creates a handle that owns nothing but remembers the policy for later adoption.
    #[must_use]
    pub fn null_with(deleter: D) -> Self {
        Self {
            state: None,
            deleter,
            _owns: PhantomData,
        }
    }

    /// Becomes the first owner of the resource at `ptr`, to be destroyed through `deleter`.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `ptr` addresses a live resource that `deleter` is able to
    /// destroy and that nothing else owns or destroys it.
    #[must_use]
    pub unsafe fn from_raw(ptr: NonNull<T>, deleter: D) -> Self {
        Self {
            state: Some(SharedState::adopt(ptr)),
            deleter,
            _owns: PhantomData,
        }
    }

    /// Address of the shared resource, or `None` if the handle is null.
    #[must_use]
    #[inline]
    pub fn get(&self) -> Option<NonNull<T>> {
        self.state.map(|state| state.ptr)
    }

    /// Whether the handle owns nothing.
    #[must_use]
    #[inline]
    pub fn is_null(&self) -> bool {
        self.state.is_none()
    }

    /// Shared reference to the resource, or `None` if the handle is null.
    #[must_use]
    #[inline]
    pub fn as_ref(&self) -> Option<&T> {
        // SAFETY: The resource stays alive for as long as we are one of its owners.
        self.state.map(|state| unsafe { state.ptr.as_ref() })
    }

    /// Number of handles that currently own the resource, or zero if the handle is null.
    #[must_use]
    #[inline]
    pub fn use_count(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.count().get())
    }

    /// The destruction policy of the handle.
    #[must_use]
    #[inline]
    pub fn deleter(&self) -> &D {
        &self.deleter
    }

    /// Whether both handles are owners in the same ownership group (or are both null).
    ///
    /// Identity is decided by the shared owner count rather than by the resource address, since
    /// distinct zero-sized resources may share one address.
    #[must_use]
    pub fn ptr_eq<U: ?Sized, E: Deleter<U>>(&self, other: &Shared<U, E>) -> bool {
        self.state.map(|state| state.count) == other.state.map(|state| state.count)
    }

    /// Gives up this handle's ownership, then becomes the first owner of `ptr` with a fresh
    /// owner count.
    ///
    /// # Safety
    ///
    /// If `ptr` is `Some`, the caller must ensure that it addresses a live resource that the
    /// handle's deleter is able to destroy and that nothing else owns or destroys it.
    pub unsafe fn reset(&mut self, ptr: Option<NonNull<T>>) {
        self.release();

        self.state = ptr.map(SharedState::adopt);
    }

    /// Gives up this handle's ownership, leaving the handle null.
    ///
    /// The resource is destroyed if this was its last owner.
    pub fn clear(&mut self) {
        self.release();
    }

    /// Moves this handle's ownership into a new handle without changing the owner count, leaving
    /// this handle null.
    #[must_use]
    pub fn take(&mut self) -> Self
    where
        D: Default,
    {
        Self {
            state: self.state.take(),
            deleter: std::mem::take(&mut self.deleter),
            _owns: PhantomData,
        }
    }

    /// Gives up this handle's ownership, then becomes an additional owner of the resource that
    /// `other` refers to.
    pub fn assign(&mut self, other: &Self)
    where
        D: Clone,
    {
        if self.ptr_eq(other) {
            return;
        }

        self.release();

        self.state = other.acquire();
        self.deleter = other.deleter.clone();
    }

    /// Creates an additional owner of the resource, typed as a more general resource type.
    ///
    /// The `cast` function receives the resource and must return a reference to the same object,
    /// typically by coercing it to a trait object. Both handles share one owner count.
    ///
    /// # Panics
    ///
    /// Panics if `cast` returns a reference to a different object (a different address, size or
    /// alignment).
    ///
    /// The check compares only the address, size and alignment of the object. A cast to a field
    /// that matches its container in all three, such as the inner field of a
    /// `#[repr(transparent)]` wrapper, passes the check. The deleter then destroys only that
    /// field and the container's own `Drop` never runs.
    #[must_use]
    #[track_caller]
    pub fn upcast<U: ?Sized, E>(&self, cast: impl FnOnce(&T) -> &U) -> Shared<U, E>
    where
        D: Clone + Into<E>,
        E: Deleter<U>,
    {
        let state = self.state.map(|state| SharedState {
            ptr: cast_shared(state.ptr, cast),
            count: state.count,
        });

        if let Some(state) = &state {
            increment(state.count());
        }

        Shared {
            state,
            deleter: self.deleter.clone().into(),
            _owns: PhantomData,
        }
    }

    /// Transfers this handle's ownership to a handle of a more general resource type, without
    /// changing the owner count.
    ///
    /// # Panics
    ///
    /// Panics if `cast` returns a reference to a different object (a different address, size or
    /// alignment).
    ///
    /// The check compares only the address, size and alignment of the object. A cast to a field
    /// that matches its container in all three, such as the inner field of a
    /// `#[repr(transparent)]` wrapper, passes the check. The deleter then destroys only that
    /// field and the container's own `Drop` never runs.
    #[must_use]
    #[track_caller]
    pub fn into_upcast<U: ?Sized, E>(self, cast: impl FnOnce(&T) -> &U) -> Shared<U, E>
    where
        D: Into<E>,
        E: Deleter<U>,
    {
        let mut this = ManuallyDrop::new(self);

        let state = this.state.take();

        // SAFETY: `this` is never dropped, so the deleter is moved out exactly once.
        let deleter = unsafe { ptr::read(&this.deleter) };

        let state = state.map(|state| SharedState {
            ptr: cast_shared(state.ptr, cast),
            count: state.count,
        });

        Shared {
            state,
            deleter: deleter.into(),
            _owns: PhantomData,
        }
    }

    /// Adds an owner to our resource and returns the state to store in the new owner.
    fn acquire(&self) -> Option<SharedState<T>> {
        if let Some(state) = &self.state {
            increment(state.count());
        }

        self.state
    }

    /// Removes this handle as an owner, destroying the resource and its count if it was the last.
    fn release(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };

        let count = state.count();
        // Cannot underflow: this handle is one of the owners being counted.
        let remaining = count.get().wrapping_sub(1);
        count.set(remaining);

        if remaining == 0 {
            // SAFETY: We were the last owner, so nobody else refers to the resource any more.
            unsafe {
                self.deleter.delete(state.ptr);
            }

            // SAFETY: The count cell was created by `new_in()` with the same allocator and the
            // last handle referring to it is letting go.
            unsafe {
                delete_in(&SystemAllocator, state.count);
            }
        }
    }
}

fn increment(count: &Cell<usize>) {
    count.set(
        count
            .get()
            .checked_add(1)
            .expect("every owner is a live handle, so the count cannot reach usize::MAX"),
    );
}

#[track_caller]
fn cast_shared<T: ?Sized, U: ?Sized>(
    ptr: NonNull<T>,
    cast: impl FnOnce(&T) -> &U,
) -> NonNull<U> {
    // SAFETY: The caller holds ownership of the resource, so it is alive.
    let resource = unsafe { ptr.as_ref() };
    let before = ObjectIdentity::of(resource);

    let target = cast(resource);

    if ObjectIdentity::of(target) != before {
        violation(Violation::CastMismatch);
    }

    NonNull::from(target)
}

impl<T: ?Sized, D: Deleter<T> + Clone> Clone for Shared<T, D> {
    fn clone(&self) -> Self {
        Self {
            state: self.acquire(),
            deleter: self.deleter.clone(),
            _owns: PhantomData,
        }
    }
}

impl<T: ?Sized, D: Deleter<T>> Drop for Shared<T, D> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: ?Sized, D: Deleter<T> + Default> Default for Shared<T, D> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized, D: Deleter<T>> Deref for Shared<T, D> {
    type Target = T;

    /// # Panics
    ///
    /// Panics if the handle is null.
    #[track_caller]
    fn deref(&self) -> &Self::Target {
        match self.as_ref() {
            Some(value) => value,
            None => violation(Violation::NullPointer),
        }
    }
}

impl<T: ?Sized, D: Deleter<T>> From<Unique<T, D>> for Shared<T, D> {
    /// Converts exclusive ownership into shared ownership with a single owner.
    fn from(unique: Unique<T, D>) -> Self {
        let (ptr, deleter) = unique.into_parts();

        match ptr {
            // SAFETY: The exclusive handle owned the resource with this very deleter.
            Some(ptr) => unsafe { Self::from_raw(ptr, deleter) },
            None => Self::null_with(deleter),
        }
    }
}

impl<T: ?Sized, D: Deleter<T>, U: ?Sized, E: Deleter<U>> PartialEq<Shared<U, E>> for Shared<T, D> {
    /// Handles are equal if they are owners in the same ownership group (or are both null).
    fn eq(&self, other: &Shared<U, E>) -> bool {
        self.ptr_eq(other)
    }
}

impl<T: ?Sized, D: Deleter<T>> Eq for Shared<T, D> {}

impl<T: ?Sized, D: Deleter<T>> fmt::Debug for Shared<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("ptr", &thin(self.get()))
            .field("use_count", &self.use_count())
            .finish_non_exhaustive()
    }
}

impl<T: ?Sized, D: Deleter<T>> fmt::Pointer for Shared<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&thin(self.get()).unwrap_or(ptr::null_mut()), f)
    }
}

/// Moves `value` into memory from the current thread's context allocator and becomes its first
/// owner.
///
/// The last owner releases the memory through that same allocator, even if the thread's allocator
/// context changes in the meantime.
#[must_use]
pub fn make_context_shared<T>(value: T) -> Shared<T, ContextDelete> {
    let deleter = ContextDelete::current();
    let ptr = new_in(deleter.allocator(), value);

    // SAFETY: The resource was just allocated through the deleter's allocator.
    unsafe { Shared::from_raw(ptr, deleter) }
}
