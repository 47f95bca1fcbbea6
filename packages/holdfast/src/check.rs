//! Checked failure path shared by every container.
//!
//! Safe operations verify their preconditions in every build profile. The unchecked fast path is
//! only reachable through `unsafe` functions whose names end in `_unchecked`.

use std::panic::Location;

use tracing::error;

use crate::{Error, Violation};

/// Reports a broken precondition and terminates the current operation by panicking.
#[cold]
#[inline(never)]
#[track_caller]
pub(crate) fn violation(violation: Violation) -> ! {
    let error = Error::ContractViolation(violation);

    error!(%error, location = %Location::caller(), "contract violation");

    panic!("{error}");
}

/// Verifies that `index` addresses an element of a container with `len` elements.
#[inline]
#[track_caller]
pub(crate) fn check_index(index: usize, len: usize) {
    if index >= len {
        violation(Violation::IndexOutOfRange { index, len });
    }
}

/// Verifies that `start..end` lies within a container with `len` elements.
#[inline]
#[track_caller]
pub(crate) fn check_range(start: usize, end: usize, len: usize) {
    if start > end || end > len {
        violation(Violation::RangeOutOfRange { start, end, len });
    }
}
