//! Read-only introspection for diagnostic tooling.

use std::sync::Arc;

use crate::demand::Demand;
use crate::error::RelayError;

/// Attribute keys understood by [`Scannable::scan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attr {
    /// The downstream subscriber being fed.
    Actual,
    /// The upstream subscription.
    Parent,
    /// Outstanding demand declared by the downstream.
    RequestedFromDownstream,
    /// How much the operator asks from upstream ahead of demand.
    Prefetch,
    /// Number of values currently held.
    Buffered,
    /// The captured terminal error.
    Error,
    /// Whether upstream has terminated.
    Terminated,
    /// Whether the downstream has cancelled.
    Cancelled,
    /// Diagnostic name of the component.
    Name,
}

/// Opaque reference to a collaborator handle, compared by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleRef {
    addr: usize,
    type_name: &'static str,
}

impl HandleRef {
    /// Capture the identity of `handle`.
    pub fn of<U: ?Sized>(handle: &Arc<U>) -> Self {
        Self {
            addr: Arc::as_ptr(handle) as *const () as usize,
            type_name: std::any::type_name::<U>(),
        }
    }

    /// Returns `true` if this reference points at `handle`.
    pub fn is<U: ?Sized>(&self, handle: &Arc<U>) -> bool {
        self.addr == Arc::as_ptr(handle) as *const () as usize
    }

    /// Static type name of the handle as it was captured.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

/// Value returned for an attribute.
#[derive(Debug, Clone)]
pub enum AttrValue {
    Handle(HandleRef),
    Demand(Demand),
    Count(usize),
    Error(RelayError),
    Flag(bool),
    Name(String),
}

impl AttrValue {
    pub fn as_handle(&self) -> Option<HandleRef> {
        match self {
            AttrValue::Handle(handle) => Some(*handle),
            _ => None,
        }
    }

    pub fn as_demand(&self) -> Option<Demand> {
        match self {
            AttrValue::Demand(demand) => Some(*demand),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<usize> {
        match self {
            AttrValue::Count(count) => Some(*count),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&RelayError> {
        match self {
            AttrValue::Error(error) => Some(error),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            AttrValue::Flag(flag) => Some(*flag),
            _ => None,
        }
    }
}

/// Side-effect free attribute query.
///
/// Implementations must be safe to call concurrently with every other
/// operation of the component and must never change its state.
pub trait Scannable {
    /// Returns `None` when the attribute does not apply or is absent.
    fn scan(&self, attr: Attr) -> Option<AttrValue>;

    /// Shorthand for boolean attributes; absent reads as `false`.
    fn scan_flag(&self, attr: Attr) -> bool {
        self.scan(attr)
            .and_then(|value| value.as_flag())
            .unwrap_or(false)
    }
}
