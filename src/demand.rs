//! Demand accounting for request-n backpressure.
//!
//! Demand is stored in a single `AtomicU64` where [`UNBOUNDED`] is a sticky
//! sentinel: once reached, it is never decremented again.

use std::sync::atomic::{AtomicU64, Ordering};

/// Sentinel meaning "the consumer can never exhaust its demand".
pub const UNBOUNDED: u64 = u64::MAX;

/// Demand signal used for backpressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demand {
    /// Finite demand with remaining count.
    Finite(u64),
    /// Unbounded demand.
    Unbounded,
}

impl Demand {
    /// Interpret a raw counter value.
    pub const fn from_raw(raw: u64) -> Self {
        if raw == UNBOUNDED {
            Demand::Unbounded
        } else {
            Demand::Finite(raw)
        }
    }

    /// Returns `true` if the demand is unbounded.
    pub const fn is_unbounded(&self) -> bool {
        matches!(self, Self::Unbounded)
    }

    /// Returns `true` if there is remaining demand.
    pub const fn has_demand(&self) -> bool {
        matches!(self, Self::Unbounded) || matches!(self, Self::Finite(remaining) if *remaining > 0)
    }

    /// Returns the remaining finite demand, if any.
    pub const fn remaining(&self) -> Option<u64> {
        match self {
            Self::Finite(value) => Some(*value),
            Self::Unbounded => None,
        }
    }
}

/// Add `n` to `requested`, saturating at [`UNBOUNDED`].
///
/// Returns the value before the addition.
pub fn add_cap(requested: &AtomicU64, n: u64) -> u64 {
    // fetch_update only fails when the closure returns None, which it never does
    match requested.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
        if current == UNBOUNDED {
            Some(UNBOUNDED)
        } else {
            Some(current.saturating_add(n))
        }
    }) {
        Ok(previous) | Err(previous) => previous,
    }
}

/// Subtract `n` delivered values from `requested`.
///
/// Unbounded demand is left untouched. Delivering more than was requested
/// is logged and the counter is clamped at zero.
pub fn produced(requested: &AtomicU64, n: u64) -> u64 {
    let mut current = requested.load(Ordering::Acquire);
    loop {
        if current == UNBOUNDED {
            return UNBOUNDED;
        }
        let next = match current.checked_sub(n) {
            Some(next) => next,
            None => {
                tracing::error!(
                    requested = current,
                    produced = n,
                    "more values produced than requested"
                );
                0
            }
        };
        match requested.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return next,
            Err(actual) => current = actual,
        }
    }
}
