use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::check::violation;
use crate::{Storage, Violation};

/// A value that may be present or absent, stored in place.
///
/// Storing a value into an `Optional` that already holds one drops the old value first.
/// Dereferencing an absent optional is a contract violation; use
/// [`try_get()`][Self::try_get] to observe absence instead.
///
/// # Example
///
/// ```
/// use holdfast::Optional;
///
/// let mut slot: Optional<i32> = Optional::none();
/// assert!(slot.is_none());
///
/// slot.set(5);
/// assert_eq!(*slot, 5);
///
/// slot.reset();
/// assert_eq!(slot.try_get(), None);
/// ```
pub struct Optional<T> {
    present: bool,
    storage: Storage<T>,
}

impl<T> Optional<T> {
    /// Creates an optional without a value.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            present: false,
            storage: Storage::uninit(),
        }
    }

    /// Creates an optional holding `value`.
    #[must_use]
    pub fn some(value: T) -> Self {
        let mut optional = Self::none();
        optional.set(value);
        optional
    }

    /// Whether a value is present.
    #[must_use]
    #[inline]
    pub fn is_some(&self) -> bool {
        self.present
    }

    /// Whether the optional is empty.
    #[must_use]
    #[inline]
    pub fn is_none(&self) -> bool {
        !self.present
    }

    /// Drops the current value (if any), then stores `value`.
    pub fn set(&mut self, value: T) -> &mut T {
        self.reset();

        let value = self.storage.write(value);
        self.present = true;
        value
    }

    /// Drops the current value (if any), leaving the optional empty.
    pub fn reset(&mut self) {
        if self.present {
            // Cleared first so a panicking destructor cannot cause a double drop.
            self.present = false;

            // SAFETY: The flag said the value was live and it is no longer considered so.
            unsafe {
                self.storage.assume_init_drop();
            }
        }
    }

    /// The value.
    ///
    /// # Panics
    ///
    /// Panics if the optional is empty.
    #[must_use]
    #[track_caller]
    pub fn get(&self) -> &T {
        if !self.present {
            violation(Violation::AbsentOptional);
        }

        // SAFETY: Just checked that the value is present.
        unsafe { self.storage.assume_init_ref() }
    }

    /// The value, mutably.
    ///
    /// # Panics
    ///
    /// Panics if the optional is empty.
    #[must_use]
    #[track_caller]
    pub fn get_mut(&mut self) -> &mut T {
        if !self.present {
            violation(Violation::AbsentOptional);
        }

        // SAFETY: Just checked that the value is present.
        unsafe { self.storage.assume_init_mut() }
    }

    /// The value, or `None` if the optional is empty.
    #[must_use]
    #[inline]
    pub fn try_get(&self) -> Option<&T> {
        if self.present {
            // SAFETY: The value is live whenever the flag is set.
            Some(unsafe { self.storage.assume_init_ref() })
        } else {
            None
        }
    }

    /// The value mutably, or `None` if the optional is empty.
    #[must_use]
    #[inline]
    pub fn try_get_mut(&mut self) -> Option<&mut T> {
        if self.present {
            // SAFETY: The value is live whenever the flag is set.
            Some(unsafe { self.storage.assume_init_mut() })
        } else {
            None
        }
    }

    /// The value, without checking that it is present.
    ///
    /// # Safety
    ///
    /// The caller must ensure that the optional holds a value.
    #[must_use]
    #[inline]
    pub unsafe fn get_unchecked(&self) -> &T {
        // SAFETY: Forwarding the caller's guarantee that the value is present.
        unsafe { self.storage.assume_init_ref() }
    }

    /// The value, first storing the result of `make` if the optional is empty.
    pub fn get_or_insert_with(&mut self, make: impl FnOnce() -> T) -> &mut T {
        if !self.present {
            self.set(make());
        }

        // SAFETY: A value was either present already or has just been stored.
        unsafe { self.storage.assume_init_mut() }
    }

    /// Moves the value out, leaving the optional empty.
    pub fn take(&mut self) -> Option<T> {
        if !self.present {
            return None;
        }

        self.present = false;

        // SAFETY: The flag said the value was live and it is no longer considered so.
        Some(unsafe { self.storage.assume_init_read() })
    }

    /// Replaces the current value with the value of `other`, but only if `other` holds one.
    ///
    /// An empty `other` leaves this optional unchanged.
    pub fn accept(&mut self, mut other: Self) -> &mut Self {
        if let Some(value) = other.take() {
            self.set(value);
        }

        self
    }

    /// Calls `inspect` with the value if one is present, then returns the optional unchanged.
    #[must_use]
    pub fn inspect(self, inspect: impl FnOnce(&T)) -> Self {
        if let Some(value) = self.try_get() {
            inspect(value);
        }

        self
    }

    /// Converts into a standard [`Option`].
    #[must_use]
    pub fn into_option(mut self) -> Option<T> {
        self.take()
    }
}

impl<T> Drop for Optional<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T> Default for Optional<T> {
    fn default() -> Self {
        Self::none()
    }
}

impl<T> Deref for Optional<T> {
    type Target = T;

    /// # Panics
    ///
    /// Panics if the optional is empty.
    #[track_caller]
    fn deref(&self) -> &Self::Target {
        self.get()
    }
}

impl<T> DerefMut for Optional<T> {
    /// # Panics
    ///
    /// Panics if the optional is empty.
    #[track_caller]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.get_mut()
    }
}

impl<T: Clone> Clone for Optional<T> {
    fn clone(&self) -> Self {
        match self.try_get() {
            Some(value) => Self::some(value.clone()),
            None => Self::none(),
        }
    }
}

impl<T: PartialEq> PartialEq for Optional<T> {
    /// Optionals are equal if both are empty or both hold equal values.
    fn eq(&self, other: &Self) -> bool {
        self.try_get() == other.try_get()
    }
}

impl<T: PartialEq> PartialEq<T> for Optional<T> {
    /// An optional equals a value if it holds an equal value.
    fn eq(&self, other: &T) -> bool {
        self.try_get() == Some(other)
    }
}

impl<T: Eq> Eq for Optional<T> {}

impl<T> From<T> for Optional<T> {
    fn from(value: T) -> Self {
        Self::some(value)
    }
}

impl<T> From<Option<T>> for Optional<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or_else(Self::none, Self::some)
    }
}

impl<T> From<Optional<T>> for Option<T> {
    fn from(value: Optional<T>) -> Self {
        value.into_option()
    }
}

impl<T: fmt::Debug> fmt::Debug for Optional<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_get() {
            Some(value) => f.debug_tuple("Optional").field(value).finish(),
            None => f.write_str("Optional(<none>)"),
        }
    }
}
