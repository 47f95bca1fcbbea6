use crate::{AllocContext, ErasedAllocator};

/// Builder for creating an instance of [`AllocContext`].
///
/// All settings are optional. Without any configuration, the base entry of the context is the
/// host process heap.
///
/// # Examples
///
/// ```
/// use holdfast::AllocContext;
///
/// let context = AllocContext::builder().build();
/// assert_eq!(context.depth(), 1);
/// ```
///
/// With a custom base allocator:
///
/// ```
/// use holdfast::{AllocContext, ErasedAllocator, TrackingAllocator};
///
/// let context = AllocContext::builder()
///     .base(ErasedAllocator::new(TrackingAllocator::system()))
///     .build();
/// ```
#[derive(Debug)]
#[must_use]
pub struct AllocContextBuilder {
    base: Option<ErasedAllocator>,
}

impl AllocContextBuilder {
    #[inline]
    pub(crate) fn new() -> Self {
        Self { base: None }
    }

    /// Sets the allocator at the bottom of the stack. This entry can never be popped.
    #[inline]
    pub fn base(mut self, allocator: ErasedAllocator) -> Self {
        self.base = Some(allocator);
        self
    }

    /// Builds the context with the specified configuration.
    #[must_use]
    #[inline]
    pub fn build(self) -> AllocContext {
        AllocContext::with_base(self.base.unwrap_or_else(ErasedAllocator::system))
    }
}
