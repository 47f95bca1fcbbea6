use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};

use crate::check::violation;
use crate::{ContextDelete, DefaultDelete, Deleter, Violation, new_in};

/// Handle that exclusively owns a resource and destroys it through a pluggable policy.
///
/// At most one `Unique` refers to a given resource. The handle cannot be cloned; moving it moves
/// ownership. [`take()`][Self::take] performs an observable move that leaves the source null.
///
/// When a non-null handle is dropped, its [`Deleter`] runs exactly once on the resource.
///
/// # Examples
///
/// ```
/// use holdfast::Unique;
///
/// let mut a = Unique::new(String::from("owned"));
/// let original = a.get();
///
/// let b = a.take();
///
/// assert!(a.get().is_none());
/// assert_eq!(b.get(), original);
/// assert_eq!(&*b, "owned");
/// ```
///
/// Transferring ownership to a trait object:
///
/// ```
/// use std::fmt::Display;
///
/// use holdfast::Unique;
///
/// let concrete = Unique::new(42_u32);
/// let erased: Unique<dyn Display> = concrete.upcast(|value| value as &mut dyn Display);
///
/// assert_eq!(erased.to_string(), "42");
/// ```
pub struct Unique<T: ?Sized, D: Deleter<T> = DefaultDelete> {
    ptr: Option<NonNull<T>>,
    deleter: D,

    _owns: PhantomData<T>,
}

impl<T> Unique<T> {
    /// Moves `value` to the host heap and takes ownership of it.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }
}

impl<T: ?Sized> Unique<T> {
    /// Takes ownership of a boxed resource.
    #[must_use]
    pub fn from_box(value: Box<T>) -> Self {
        Self {
            ptr: Some(NonNull::from(Box::leak(value))),
            deleter: DefaultDelete,
            _owns: PhantomData,
        }
    }
}

impl<T: ?Sized, D: Deleter<T>> Unique<T, D> {
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
            ptr: None,
            deleter,
            _owns: PhantomData,
        }
    }

    /// Takes ownership of the resource at `ptr`, to be destroyed through `deleter`.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `ptr` addresses a live resource that `deleter` is able to
    /// destroy and that nothing else owns or destroys it.
    #[must_use]
    pub unsafe fn from_raw(ptr: NonNull<T>, deleter: D) -> Self {
        Self {
            ptr: Some(ptr),
            deleter,
            _owns: PhantomData,
        }
    }

    /// Address of the owned resource, or `None` if the handle is null.
    #[must_use]
    #[inline]
    pub fn get(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    /// Whether the handle owns nothing.
    #[must_use]
    #[inline]
    pub fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    /// Shared reference to the owned resource, or `None` if the handle is null.
    #[must_use]
    #[inline]
    pub fn as_ref(&self) -> Option<&T> {
        // SAFETY: We exclusively own the resource, so it is live for as long as we are borrowed.
        self.ptr.map(|ptr| unsafe { ptr.as_ref() })
    }

    /// Exclusive reference to the owned resource, or `None` if the handle is null.
    #[must_use]
    #[inline]
    pub fn as_mut(&mut self) -> Option<&mut T> {
        // SAFETY: We exclusively own the resource and are exclusively borrowed.
        self.ptr.map(|mut ptr| unsafe { ptr.as_mut() })
    }

    /// The destruction policy of the handle.
    #[must_use]
    #[inline]
    pub fn deleter(&self) -> &D {
        &self.deleter
    }

    /// Gives up ownership without destroying the resource and returns its address.
    ///
    /// The handle is null afterwards. The caller becomes responsible for the resource.
    #[must_use = "the resource is leaked unless the returned pointer is used"]
    #[inline]
    pub fn release(&mut self) -> Option<NonNull<T>> {
        self.ptr.take()
    }

    /// Destroys the currently owned resource (if any), then takes ownership of `ptr`.
    ///
    /// # Safety
    ///
    /// If `ptr` is `Some`, the caller must ensure that it addresses a live resource that the
    /// handle's deleter is able to destroy and that nothing else owns or destroys it.
    pub unsafe fn reset(&mut self, ptr: Option<NonNull<T>>) {
        if let Some(previous) = self.ptr.take() {
            // SAFETY: We exclusively owned the previous resource and no longer refer to it.
            unsafe {
                self.deleter.delete(previous);
            }
        }

        self.ptr = ptr;
    }

    /// Destroys the currently owned resource (if any), leaving the handle null.
    pub fn clear(&mut self) {
        // SAFETY: Adopting nothing has no requirements.
        unsafe {
            self.reset(None);
        }
    }

    /// Moves ownership out into a new handle, leaving this handle null.
    ///
    /// The new handle takes over the deleter; this handle gets a default one.
    #[must_use]
    pub fn take(&mut self) -> Self
    where
        D: Default,
    {
        Self {
            ptr: self.ptr.take(),
            deleter: std::mem::take(&mut self.deleter),
            _owns: PhantomData,
        }
    }

    /// Transfers ownership to a handle of a more general resource type.
    ///
    /// The `cast` function receives the owned resource and must return a reference to the same
    /// object, typically by coercing it to a trait object. The deleter is converted into the
    /// target policy type.
    ///
    /// # Panics
    ///
    /// Panics if `cast` returns a reference to a different object (a different address, size or
    /// alignment), since the deleter could not destroy it correctly.
    ///
    /// The check compares only the address, size and alignment of the object. A cast to a field
    /// that matches its container in all three, such as the inner field of a
    /// `#[repr(transparent)]` wrapper, passes the check. The deleter then destroys only that
    /// field and the container's own `Drop` never runs.
    #[must_use]
    #[track_caller]
    pub fn upcast<U: ?Sized, E>(self, cast: impl FnOnce(&mut T) -> &mut U) -> Unique<U, E>
    where
        D: Into<E>,
        E: Deleter<U>,
    {
        let (ptr, deleter) = self.into_parts();

        let ptr = ptr.map(|mut ptr| {
            // SAFETY: We exclusively own the resource, having just taken it out of the handle.
            let resource = unsafe { ptr.as_mut() };
            let before = ObjectIdentity::of(resource);

            let target = cast(resource);

            if ObjectIdentity::of(target) != before {
                violation(Violation::CastMismatch);
            }

            NonNull::from(target)
        });

        Unique {
            ptr,
            deleter: deleter.into(),
            _owns: PhantomData,
        }
    }

    /// Splits the handle into its parts without running the deleter.
    pub(crate) fn into_parts(self) -> (Option<NonNull<T>>, D) {
        let mut this = ManuallyDrop::new(self);

        let ptr = this.ptr.take();

        // SAFETY: `this` is never dropped, so the deleter is moved out exactly once.
        let deleter = unsafe { ptr::read(&this.deleter) };

        (ptr, deleter)
    }
}

impl<T: ?Sized, D: Deleter<T>> Drop for Unique<T, D> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<T: ?Sized, D: Deleter<T> + Default> Default for Unique<T, D> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized, D: Deleter<T>> Deref for Unique<T, D> {
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

impl<T: ?Sized, D: Deleter<T>> DerefMut for Unique<T, D> {
    /// # Panics
    ///
    /// Panics if the handle is null.
    #[track_caller]
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.as_mut() {
            Some(value) => value,
            None => violation(Violation::NullPointer),
        }
    }
}

impl<T: ?Sized, D: Deleter<T>, U: ?Sized, E: Deleter<U>> PartialEq<Unique<U, E>> for Unique<T, D> {
    /// Handles are equal if they refer to the same address (or are both null).
    fn eq(&self, other: &Unique<U, E>) -> bool {
        thin(self.ptr) == thin(other.ptr)
    }
}

impl<T: ?Sized, D: Deleter<T>> Eq for Unique<T, D> {}

impl<T: ?Sized, D: Deleter<T>> fmt::Debug for Unique<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unique")
            .field("ptr", &thin(self.ptr))
            .finish_non_exhaustive()
    }
}

impl<T: ?Sized, D: Deleter<T>> fmt::Pointer for Unique<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&thin(self.ptr).unwrap_or(ptr::null_mut()), f)
    }
}

// SAFETY: The handle owns the resource exclusively, like `Box<T>`, and owns the deleter.
unsafe impl<T: ?Sized + Send, D: Deleter<T> + Send> Send for Unique<T, D> {}

// SAFETY: Shared access to the handle only grants shared access to the resource and deleter.
unsafe impl<T: ?Sized + Sync, D: Deleter<T> + Sync> Sync for Unique<T, D> {}

/// Moves `value` into memory from the current thread's context allocator.
///
/// The returned handle releases the memory through that same allocator, even if the thread's
/// allocator context changes before the handle is dropped.
///
/// # Example
///
/// ```
/// use std::rc::Rc;
///
/// use holdfast::{ErasedAllocator, TrackingAllocator, make_context_unique, push_context_allocator};
///
/// let tracker = Rc::new(TrackingAllocator::system());
///
/// let value = {
///     let _guard = push_context_allocator(ErasedAllocator::from_rc(Rc::clone(&tracker)));
///     make_context_unique(7_u64)
/// };
///
/// // The context has been restored, yet the memory is still accounted to the tracker.
/// assert_eq!(tracker.live_allocations(), 1);
/// drop(value);
/// assert_eq!(tracker.live_allocations(), 0);
/// ```
#[must_use]
pub fn make_context_unique<T>(value: T) -> Unique<T, ContextDelete> {
    let deleter = ContextDelete::current();
    let ptr = new_in(deleter.allocator(), value);

    // SAFETY: The resource was just allocated through the deleter's allocator.
    unsafe { Unique::from_raw(ptr, deleter) }
}

/// Address of a possibly unsized resource, without metadata.
pub(crate) fn thin<T: ?Sized>(ptr: Option<NonNull<T>>) -> Option<*mut u8> {
    ptr.map(|ptr| ptr.as_ptr().cast::<u8>())
}

/// What must be preserved for a reference to denote the same allocated object.
#[derive(Debug, Eq, PartialEq)]
pub(crate) struct ObjectIdentity {
    address: *const u8,
    size: usize,
    align: usize,
}

impl ObjectIdentity {
    pub(crate) fn of<T: ?Sized>(value: &T) -> Self {
        Self {
            address: ptr::from_ref(value).cast::<u8>(),
            size: size_of_val(value),
            align: align_of_val(value),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::fmt::Display;
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::{DeleteFn, ErasedAllocator, NoFreeDelete, TrackingAllocator, push_context_allocator};

    assert_impl_all!(Unique<u32>: Send, Sync);
    assert_not_impl_any!(Unique<Cell<u32>>: Sync);
    assert_not_impl_any!(Unique<u32, ContextDelete>: Send, Sync);
    assert_not_impl_any!(Unique<u32>: Clone);

    /// Test helper that counts how many times it has been dropped.
    struct DropCounter {
        drops: Rc<Cell<usize>>,
    }

    impl DropCounter {
        fn new() -> (Self, Rc<Cell<usize>>) {
            let drops = Rc::new(Cell::new(0));
            (
                Self {
                    drops: Rc::clone(&drops),
                },
                drops,
            )
        }
    }

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    trait Named {
        fn name(&self) -> &'static str;
    }

    impl Named for DropCounter {
        fn name(&self) -> &'static str {
            "counter"
        }
    }

    #[test]
    fn drop_runs_deleter_once() {
        let (counter, drops) = DropCounter::new();

        let owned = Unique::new(counter);
        assert_eq!(drops.get(), 0);

        drop(owned);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn take_nulls_source_and_keeps_address() {
        let (counter, drops) = DropCounter::new();
        let mut a = Unique::new(counter);
        let original = a.get();

        let b = a.take();

        assert!(a.get().is_none());
        assert!(a.is_null());
        assert_eq!(b.get(), original);

        drop(a);
        assert_eq!(drops.get(), 0);

        drop(b);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn release_skips_deleter() {
        let (counter, drops) = DropCounter::new();
        let mut owned = Unique::new(counter);

        let raw = owned.release().unwrap();
        assert!(owned.is_null());

        drop(owned);
        assert_eq!(drops.get(), 0);

        // SAFETY: Ownership was released to us and the pointer came from a Box.
        drop(unsafe { Box::from_raw(raw.as_ptr()) });
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn reset_deletes_previous_before_adopting() {
        let (first, first_drops) = DropCounter::new();
        let (second, second_drops) = DropCounter::new();

        let mut owned = Unique::new(first);
        let replacement = NonNull::from(Box::leak(Box::new(second)));

        // SAFETY: The replacement is a leaked Box, which DefaultDelete releases.
        unsafe { owned.reset(Some(replacement)) };

        assert_eq!(first_drops.get(), 1);
        assert_eq!(second_drops.get(), 0);
        assert_eq!(owned.get(), Some(replacement));

        owned.clear();
        assert_eq!(second_drops.get(), 1);
        assert!(owned.is_null());
    }

    #[test]
    fn custom_deleter_sees_original_address() {
        let seen = Cell::new(None);
        let boxed = NonNull::from(Box::leak(Box::new(11_i32)));

        {
            let deleter = DeleteFn(|ptr: NonNull<i32>| {
                seen.set(Some(ptr));
                // SAFETY: The pointer came from a leaked Box.
                drop(unsafe { Box::from_raw(ptr.as_ptr()) });
            });

            // SAFETY: The closure releases leaked Boxes.
            let owned = unsafe { Unique::from_raw(boxed, deleter) };
            assert_eq!(*owned, 11);
        }

        assert_eq!(seen.get(), Some(boxed));
    }

    #[test]
    fn no_free_deleter_drops_in_place() {
        let (counter, drops) = DropCounter::new();
        let mut slot = ManuallyDrop::new(counter);

        {
            // SAFETY: The value is live and ManuallyDrop prevents a second drop.
            let _owned = unsafe { Unique::from_raw(NonNull::from(&mut *slot), NoFreeDelete) };
        }

        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn upcast_transfers_ownership_to_trait_object() {
        let (counter, drops) = DropCounter::new();
        let concrete = Unique::new(counter);
        let address = thin(concrete.get());

        let erased: Unique<dyn Named> = concrete.upcast(|value| value as &mut dyn Named);

        assert_eq!(erased.name(), "counter");
        assert_eq!(thin(erased.get()), address);
        assert_eq!(drops.get(), 0);

        drop(erased);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn upcast_of_null_stays_null() {
        let null = Unique::<u32>::null();

        let erased: Unique<dyn Display> = null.upcast(|value| value as &mut dyn Display);

        assert!(erased.is_null());
    }

    #[test]
    #[should_panic(expected = "an upcast must produce a reference to the same object")]
    fn upcast_to_field_is_rejected() {
        let pair = Unique::new((1_u32, 2_u32));

        let _field: Unique<u32> = pair.upcast(|pair| &mut pair.1);
    }

    #[test]
    fn upcast_to_transparent_field_destroys_only_the_field() {
        #[repr(transparent)]
        struct Wrapper(DropCounter);

        impl Drop for Wrapper {
            fn drop(&mut self) {
                self.0.drops.set(self.0.drops.get() + 10);
            }
        }

        let (counter, drops) = DropCounter::new();
        let wrapped = Unique::new(Wrapper(counter));

        // Same address, size and alignment, so the identity check cannot tell them apart.
        let inner: Unique<DropCounter> = wrapped.upcast(|wrapper| &mut wrapper.0);

        drop(inner);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    #[should_panic(expected = "dereferenced an empty ownership handle")]
    fn deref_of_null_panics() {
        let null = Unique::<u32>::null();

        let _value: u32 = *null;
    }

    #[test]
    fn deref_mut_modifies_resource() {
        let mut owned = Unique::new(vec![1, 2]);

        owned.push(3);

        assert_eq!(*owned, vec![1, 2, 3]);
    }

    #[test]
    fn equality_compares_addresses() {
        let a = Unique::new(1_u8);
        let b = Unique::new(1_u8);

        assert_ne!(a, b);
        assert_eq!(a.get(), a.as_ref().map(NonNull::from));
        assert_eq!(Unique::<u8>::null(), Unique::<u16>::null());
    }

    #[test]
    fn context_unique_frees_through_capturing_allocator() {
        let tracker = Rc::new(TrackingAllocator::system());

        let owned = {
            let _guard = push_context_allocator(ErasedAllocator::from_rc(Rc::clone(&tracker)));
            make_context_unique(String::from("context"))
        };

        assert_eq!(tracker.live_allocations(), 1);
        assert_eq!(&*owned, "context");

        drop(owned);
        assert_eq!(tracker.live_allocations(), 0);
        assert_eq!(tracker.free_count(), 1);
    }
}
