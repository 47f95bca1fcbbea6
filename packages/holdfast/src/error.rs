use std::alloc::Layout;

use thiserror::Error;

/// Errors that can occur when working with the ownership and container runtime.
///
/// Safe container operations never return these. They detect the same conditions and treat them
/// as fatal (see [`Violation`]). The error type surfaces where a caller asked to observe the
/// condition instead, such as [`Allocator::allocate()`][crate::Allocator::allocate] or
/// [`AllocContext::try_pop()`][crate::AllocContext::try_pop].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The caller broke a documented precondition of an operation.
    #[error("contract violation: {0}")]
    ContractViolation(Violation),

    /// The host allocator could not satisfy an allocation request.
    #[error(
        "allocation of {} bytes aligned to {} failed",
        .layout.size(),
        .layout.align()
    )]
    AllocationFailure {
        /// The layout of the request that failed.
        layout: Layout,
    },
}

/// The specific precondition that was broken by a caller.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum Violation {
    /// An element index was at or beyond the length of the container.
    #[error("index {index} is out of range for length {len}")]
    IndexOutOfRange {
        /// The index that was requested.
        index: usize,

        /// The length of the container at the time of the request.
        len: usize,
    },

    /// A range of elements did not fit within the container.
    #[error("range {start}..{end} is out of range for length {len}")]
    RangeOutOfRange {
        /// First index of the range.
        start: usize,

        /// One past the last index of the range.
        end: usize,

        /// The length of the container at the time of the request.
        len: usize,
    },

    /// More elements were requested to be removed than the container holds.
    #[error("cannot remove {requested} elements from a container of length {len}")]
    NotEnoughElements {
        /// The number of elements requested to be removed.
        requested: usize,

        /// The length of the container at the time of the request.
        len: usize,
    },

    /// The base entry of an allocator stack cannot be removed.
    #[error("cannot pop the last entry of the allocator stack")]
    PopLastAllocator,

    /// An absent optional value was dereferenced.
    #[error("dereferenced an absent optional value")]
    AbsentOptional,

    /// A variant without a live alternative was accessed.
    #[error("accessed a variant that holds no alternative")]
    InvalidVariant,

    /// A variant was accessed as an alternative other than the one it holds.
    #[error("variant holds alternative {actual}, not {requested}")]
    WrongAlternative {
        /// The alternative the caller asked for.
        requested: &'static str,

        /// The alternative the variant actually holds.
        actual: &'static str,
    },

    /// An empty ownership handle was dereferenced.
    #[error("dereferenced an empty ownership handle")]
    NullPointer,

    /// A fixed-capacity container was asked to hold more than it can.
    #[error("requested capacity {requested} exceeds the fixed capacity {capacity}")]
    CapacityExceeded {
        /// The capacity that was requested.
        requested: usize,

        /// The fixed capacity of the container.
        capacity: usize,
    },

    /// A capacity request cannot be represented as a memory layout.
    #[error("capacity {requested} overflows the address space")]
    CapacityOverflow {
        /// The capacity that was requested.
        requested: usize,
    },

    /// An upcast produced a reference to something other than the original object.
    #[error("an upcast must produce a reference to the same object")]
    CastMismatch,
}

/// A specialized `Result` type for runtime operations, returning the crate's [`Error`] type as
/// the error value.
pub type Result<T> = std::result::Result<T, Error>;
