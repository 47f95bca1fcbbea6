use std::fmt;
use std::mem::MaybeUninit;

/// Memory sized and aligned for exactly one `T`, without any notion of whether a `T` lives there.
///
/// The storage never constructs or drops a value on its own. Whoever places a value into it is
/// responsible for tracking that fact and for eventually dropping or moving the value out. This
/// is the building block of [`Optional`][crate::Optional] and of the inline buffer of
/// [`FixedBacking`][crate::FixedBacking].
///
/// `Storage<T>` has the same layout as `T`, so an array of storages can be addressed as an array
/// of `T`.
///
/// # Example
///
/// ```
/// use holdfast::Storage;
///
/// let mut slot = Storage::<String>::uninit();
/// slot.write("in place".to_string());
///
/// // SAFETY: We wrote a value above and have not moved it out since.
/// assert_eq!(unsafe { slot.assume_init_ref() }, "in place");
///
/// // SAFETY: The value is live and is not used after this call.
/// unsafe { slot.assume_init_drop() };
/// ```
#[repr(transparent)]
pub struct Storage<T> {
    slot: MaybeUninit<T>,
}

impl<T> Storage<T> {
    /// Creates storage that holds no value.
    #[must_use]
    #[inline]
    pub const fn uninit() -> Self {
        Self {
            slot: MaybeUninit::uninit(),
        }
    }

    /// Returns a pointer to the storage, valid for reads only if a value has been placed there.
    #[must_use]
    #[inline]
    pub const fn as_ptr(&self) -> *const T {
        self.slot.as_ptr()
    }

    /// Returns a pointer to the storage, always valid for writes.
    #[must_use]
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.slot.as_mut_ptr()
    }

    /// Places `value` into the storage and returns a reference to it.
    ///
    /// Any value previously placed there is overwritten without being dropped.
    #[inline]
    pub fn write(&mut self, value: T) -> &mut T {
        self.slot.write(value)
    }

    /// Returns a shared reference to the value in the storage.
    ///
    /// # Safety
    ///
    /// The caller must ensure that a value has been placed into the storage and has not been
    /// moved out or dropped since.
    #[must_use]
    #[inline]
    pub unsafe fn assume_init_ref(&self) -> &T {
        // SAFETY: Forwarding the caller's guarantee that the value is live.
        unsafe { self.slot.assume_init_ref() }
    }

    /// Returns an exclusive reference to the value in the storage.
    ///
    /// # Safety
    ///
    /// The caller must ensure that a value has been placed into the storage and has not been
    /// moved out or dropped since.
    #[must_use]
    #[inline]
    pub unsafe fn assume_init_mut(&mut self) -> &mut T {
        // SAFETY: Forwarding the caller's guarantee that the value is live.
        unsafe { self.slot.assume_init_mut() }
    }

    /// Moves the value out of the storage.
    ///
    /// # Safety
    ///
    /// The caller must ensure that a value is live in the storage and must treat the storage as
    /// empty afterwards.
    #[must_use]
    #[inline]
    pub unsafe fn assume_init_read(&self) -> T {
        // SAFETY: Forwarding the caller's guarantee that the value is live.
        unsafe { self.slot.assume_init_read() }
    }

    /// Drops the value in the storage in place.
    ///
    /// # Safety
    ///
    /// The caller must ensure that a value is live in the storage and must treat the storage as
    /// empty afterwards.
    #[inline]
    pub unsafe fn assume_init_drop(&mut self) {
        // SAFETY: Forwarding the caller's guarantee that the value is live.
        unsafe { self.slot.assume_init_drop() }
    }
}

impl<T> Default for Storage<T> {
    fn default() -> Self {
        Self::uninit()
    }
}

impl<T> fmt::Debug for Storage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("size", &size_of::<T>())
            .field("align", &align_of::<T>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn layout_matches_stored_type() {
        assert_eq!(size_of::<Storage<u64>>(), size_of::<u64>());
        assert_eq!(align_of::<Storage<u64>>(), align_of::<u64>());
        assert_eq!(size_of::<Storage<[u8; 3]>>(), 3);
        assert_eq!(align_of::<Storage<u128>>(), align_of::<u128>());
    }

    #[test]
    fn dropping_storage_does_not_drop_value() {
        struct Flag(Rc<Cell<bool>>);

        impl Drop for Flag {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }

        let dropped = Rc::new(Cell::new(false));

        let mut slot = Storage::uninit();
        slot.write(Flag(Rc::clone(&dropped)));
        drop(slot);

        assert!(!dropped.get());
        // The value leaked together with the storage, leaving one extra strong reference.
        assert_eq!(Rc::strong_count(&dropped), 2);
    }

    #[test]
    fn read_moves_value_out() {
        let mut slot = Storage::uninit();
        slot.write(vec![1, 2, 3]);

        // SAFETY: Written above; the storage is treated as empty afterwards.
        let value = unsafe { slot.assume_init_read() };

        assert_eq!(value, vec![1, 2, 3]);
    }

    #[test]
    fn mutation_through_reference() {
        let mut slot = Storage::uninit();
        slot.write(10_u32);

        // SAFETY: Written above.
        unsafe {
            *slot.assume_init_mut() += 5;
        }

        // SAFETY: Written above.
        assert_eq!(unsafe { *slot.assume_init_ref() }, 15);
    }
}
