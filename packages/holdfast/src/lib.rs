#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Owning handles and containers whose memory comes from a pluggable allocator.
//!
//! The crate is built around a small [`Allocator`] trait and a per-thread stack of allocators
//! (the [`AllocContext`]). Containers either own an allocator directly, capture the allocator on
//! top of the context stack at the moment they first need memory, or never allocate at all.
//!
//! # Building blocks
//!
//! - [`Storage<T>`] - uninitialized, correctly aligned space for one `T`.
//! - [`Unique<T>`] - exclusive owner of a heap value, released through a [`Deleter`].
//! - [`Shared<T>`] - reference-counted owner; the last handle releases the value.
//! - [`DynArray<T, B>`] - a growable array over a [`Backing`]: [`HeapBacking`],
//!   [`ContextBacking`] (see [`ContextArray`]) or [`FixedBacking`] (see [`FixedArray`]).
//! - [`HybridArray<T, N>`] - keeps up to `N` elements inline, moves to the heap past that.
//! - [`Variant<E>`] - a tagged union over a closed set of alternatives declared with
//!   [`define_variant!`], with an explicit "holds nothing" state.
//! - [`Optional<T>`] - a value stored in place that may be absent.
//!
//! # Contract checks
//!
//! Safe operations verify their preconditions (index in range, value present, right alternative,
//! non-empty handle) in every build profile. A failed check is logged via `tracing` and then
//! panics with a message built from [`Violation`]. The unchecked path is reached through
//! `unsafe` functions such as [`Optional::get_unchecked()`], [`Variant::get_unchecked()`] or the
//! slice methods the arrays dereference to.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//!
//! use holdfast::{
//!     ContextArray, ErasedAllocator, TrackingAllocator, Unique, dyn_array,
//!     push_context_allocator,
//! };
//!
//! let boxed = Unique::new(42);
//! assert_eq!(*boxed, 42);
//!
//! let mut numbers = dyn_array![1, 2, 3];
//! numbers.push(4);
//! assert_eq!(numbers, [1, 2, 3, 4]);
//!
//! let tracking = Rc::new(TrackingAllocator::system());
//! let _guard = push_context_allocator(ErasedAllocator::from_rc(Rc::clone(&tracking)));
//!
//! let mut routed = ContextArray::default();
//! routed.push("via the context");
//! assert_eq!(tracking.live_allocations(), 1);
//! ```
//!
//! # Thread safety
//!
//! The context stack is thread-local and [`Shared<T>`] uses a non-atomic counter, so neither the
//! context types nor [`Shared<T>`] can cross threads. [`Unique<T>`] and the containers with a
//! heap or fixed backing are [`Send`] whenever their contents are.

mod alloc;
mod array;
mod backing;
mod builder;
mod check;
mod context;
mod deleter;
mod error;
mod hybrid;
mod optional;
mod shared;
mod storage;
mod tracking;
mod unique;
mod variant;

pub use alloc::*;
pub use array::*;
pub use backing::*;
pub use builder::*;
pub use context::*;
pub use deleter::*;
pub use error::*;
pub use hybrid::*;
pub use optional::*;
pub use shared::*;
pub use storage::*;
pub use tracking::*;
pub use unique::*;
pub use variant::*;
