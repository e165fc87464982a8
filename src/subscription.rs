use std::sync::Arc;

use crate::error::RelayError;

/// Handle a consumer uses to pull values from a producer.
///
/// `request` adds demand; `cancel` stops production. Both may be called from
/// any thread, including from inside the consumer's own callbacks.
pub trait Subscription: Send + Sync {
    /// Authorize `n` more values. Zero is a protocol violation.
    fn request(&self, n: u64);

    /// Stop production and release resources. Idempotent.
    fn cancel(&self);
}

/// Receiving side of a demand-driven stream.
///
/// ## Protocol
///
/// A producer calls `on_subscribe` at most once, then zero or more `on_next`,
/// then at most one of `on_complete` / `on_error`. Calls never overlap.
pub trait Subscriber<T>: Send + Sync {
    /// Called once with the handle used to request values.
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>);

    /// Called for each delivered value, never more often than requested.
    fn on_next(&self, value: T);

    /// Terminal failure.
    fn on_error(&self, error: RelayError);

    /// Terminal success.
    fn on_complete(&self);
}
