use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use crate::config::{BadRequestPolicy, LatestConfig};
use crate::demand::{self, Demand, UNBOUNDED};
use crate::error::{PanicError, ProtocolViolation, RelayError};
use crate::events::{DropReason, Dropped};
use crate::scan::{Attr, AttrValue, HandleRef, Scannable};
use crate::subscription::{Subscriber, Subscription};

/// Global counter for generating unique relay IDs.
static RELAY_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_relay_id() -> u64 {
    RELAY_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

enum Upstream {
    /// Producer has not acknowledged yet.
    Pending,
    Active(Arc<dyn Subscription>),
    /// Consumer cancelled; a late handle is cancelled on arrival.
    Cancelled,
    /// Terminal signal delivered, handle dropped.
    Released,
}

// ============================================================================
// LatestRelay
// ============================================================================

/// Latest-value backpressure relay.
///
/// Sits between a producer that pushes at its own pace and a consumer that
/// pulls with `request(n)`. The relay asks upstream for unbounded demand and
/// keeps only the most recent undelivered value: anything arriving while a
/// value is already pending overwrites it.
///
/// ## Serialization
///
/// Every event (value, demand, terminal, cancel) ends in [`drain`](Self::drain).
/// The `wip` counter elects a single drainer; concurrent callers only bump the
/// counter and return, and the drainer loops until it has accounted for every
/// bump. The drainer is therefore the only caller of downstream callbacks.
///
/// ## Termination
///
/// A pending value is always flushed before the terminal signal, and the
/// terminal signal is delivered at most once. After the terminal signal or a
/// cancellation the drainer never releases `wip`, so no further drain can
/// run.
pub struct LatestRelay<T> {
    id: u64,
    me: Weak<LatestRelay<T>>,
    downstream: Arc<dyn Subscriber<T>>,
    upstream: Mutex<Upstream>,
    /// Swap-on-write slot; the lock is never held across a callback.
    pending: Mutex<Option<T>>,
    requested: AtomicU64,
    wip: AtomicUsize,
    done: AtomicBool,
    error: OnceLock<RelayError>,
    cancelled: AtomicBool,
    config: LatestConfig<T>,
}

impl<T: Send + 'static> LatestRelay<T> {
    /// Create a relay feeding `downstream`, with default configuration.
    pub fn new(downstream: Arc<dyn Subscriber<T>>) -> Arc<Self> {
        Self::with_config(downstream, LatestConfig::default())
    }

    /// Create a relay feeding `downstream`.
    ///
    /// The returned relay is the `Subscriber` to hand to the producer.
    pub fn with_config(downstream: Arc<dyn Subscriber<T>>, config: LatestConfig<T>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id: next_relay_id(),
            me: me.clone(),
            downstream,
            upstream: Mutex::new(Upstream::Pending),
            pending: Mutex::new(None),
            requested: AtomicU64::new(0),
            wip: AtomicUsize::new(0),
            done: AtomicBool::new(false),
            error: OnceLock::new(),
            cancelled: AtomicBool::new(false),
            config,
        })
    }

    /// Get the unique ID of this relay.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Diagnostic name, e.g. `latest#7`.
    pub fn name(&self) -> String {
        format!("latest#{}", self.id)
    }

    /// The downstream subscriber this relay feeds.
    pub fn actual(&self) -> &Arc<dyn Subscriber<T>> {
        &self.downstream
    }

    /// The upstream handle, once acknowledged and until released.
    pub fn upstream(&self) -> Option<Arc<dyn Subscription>> {
        match &*self.upstream.lock() {
            Upstream::Active(subscription) => Some(Arc::clone(subscription)),
            _ => None,
        }
    }

    /// Demand declared by the downstream and not yet satisfied.
    pub fn requested(&self) -> Demand {
        Demand::from_raw(self.requested.load(Ordering::Acquire))
    }

    /// Whether a value is waiting for demand.
    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// The captured upstream failure, if any.
    pub fn error(&self) -> Option<RelayError> {
        self.error.get().cloned()
    }

    /// Whether upstream has completed or failed.
    pub fn is_terminated(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn drop_value(&self, value: T, reason: DropReason) {
        tracing::trace!(relay_id = self.id, %reason, "value dropped");
        if let Some(handler) = &self.config.on_dropped {
            handler(Dropped {
                relay_id: self.id,
                reason,
                value,
            });
        }
    }

    fn clear_pending(&self, reason: DropReason) {
        let value = self.pending.lock().take();
        if let Some(value) = value {
            self.drop_value(value, reason);
        }
    }

    /// Move the upstream slot to `next` and return the active handle.
    /// A released slot stays released; a handle that has not arrived yet is
    /// cancelled on arrival.
    fn detach_upstream(&self, next: Upstream) -> Option<Arc<dyn Subscription>> {
        let mut slot = self.upstream.lock();
        let next = match *slot {
            Upstream::Released => return None,
            Upstream::Pending | Upstream::Cancelled => Upstream::Cancelled,
            _ => next,
        };
        match std::mem::replace(&mut *slot, next) {
            Upstream::Active(subscription) => Some(subscription),
            _ => None,
        }
    }

    fn bad_request(&self, n: u64) {
        let violation = ProtocolViolation::NonPositiveRequest(n);
        tracing::error!(relay_id = self.id, %violation, "invalid request from downstream");
        if self.config.bad_request == BadRequestPolicy::Signal {
            if let Some(upstream) = self.detach_upstream(Upstream::Released) {
                upstream.cancel();
            }
            self.on_error(violation.into());
        }
    }

    // ========================================================================
    // Drain loop
    // ========================================================================

    /// Try to become the drainer and deliver whatever is deliverable.
    ///
    /// Returns immediately if another thread (or an outer frame of this
    /// thread) is already draining; that drainer picks up the new state.
    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }

        let mut missed = 1;
        loop {
            if self.check_terminated(self.done.load(Ordering::Acquire), !self.has_pending()) {
                return;
            }

            let requested = self.requested.load(Ordering::Acquire);
            let mut emitted = 0u64;

            while emitted != requested {
                // `done` must be read before the slot: a value taken after
                // observing `done` is the last one.
                let done = self.done.load(Ordering::Acquire);
                let value = self.pending.lock().take();

                if self.check_terminated(done, value.is_none()) {
                    if let Some(value) = value {
                        self.drop_value(value, DropReason::Cancelled);
                    }
                    return;
                }

                let Some(value) = value else {
                    break;
                };

                if !self.deliver(value) {
                    return;
                }
                emitted += 1;
            }

            if emitted == requested
                && self.check_terminated(self.done.load(Ordering::Acquire), !self.has_pending())
            {
                return;
            }

            if emitted != 0 && requested != UNBOUNDED {
                demand::produced(&self.requested, emitted);
            }

            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                break;
            }
        }
    }

    /// Returns `true` if draining must stop for good.
    fn check_terminated(&self, done: bool, empty: bool) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            self.clear_pending(DropReason::Cancelled);
            return true;
        }
        if done && empty {
            drop(self.detach_upstream(Upstream::Released));
            let outcome = match self.error.get() {
                Some(error) => {
                    tracing::debug!(relay_id = self.id, %error, "delivering failure");
                    let error = error.clone();
                    catch_unwind(AssertUnwindSafe(|| self.downstream.on_error(error)))
                }
                None => {
                    tracing::debug!(relay_id = self.id, "delivering completion");
                    catch_unwind(AssertUnwindSafe(|| self.downstream.on_complete()))
                }
            };
            if let Err(payload) = outcome {
                let panic = PanicError::new(payload);
                tracing::error!(relay_id = self.id, %panic, "downstream panicked in terminal callback");
            }
            return true;
        }
        false
    }

    /// Hand `value` to the downstream. Returns `false` if the downstream
    /// panicked, in which case the relay is now terminated and cancelled.
    fn deliver(&self, value: T) -> bool {
        let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.downstream.on_next(value))) else {
            return true;
        };

        let panic = PanicError::new(payload);
        tracing::error!(relay_id = self.id, %panic, "downstream panicked in on_next");

        // An upstream failure captured earlier wins and is the one delivered.
        if let Err(panic) = self.error.set(RelayError::new(panic, "downstream")) {
            tracing::warn!(
                relay_id = self.id,
                error = %panic,
                "panic not reported, relay already failed"
            );
        }
        self.cancelled.store(true, Ordering::Release);
        self.done.store(true, Ordering::Release);
        if let Some(upstream) = self.detach_upstream(Upstream::Released) {
            upstream.cancel();
        }
        self.clear_pending(DropReason::Cancelled);

        if let Some(error) = self.error() {
            if catch_unwind(AssertUnwindSafe(|| self.downstream.on_error(error))).is_err() {
                tracing::error!(relay_id = self.id, "downstream panicked again in on_error");
            }
        }
        false
    }
}

// ============================================================================
// Producer-facing side
// ============================================================================

impl<T: Send + 'static> Subscriber<T> for LatestRelay<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let rejected = {
            let mut slot = self.upstream.lock();
            let rejected = match &*slot {
                Upstream::Pending => None,
                Upstream::Cancelled => Some(None),
                Upstream::Active(_) | Upstream::Released => {
                    Some(Some(ProtocolViolation::DuplicateSubscription))
                }
            };
            if rejected.is_none() {
                *slot = Upstream::Active(Arc::clone(&subscription));
            }
            rejected
        };

        if let Some(violation) = rejected {
            if let Some(violation) = violation {
                tracing::error!(relay_id = self.id, %violation, "rejecting subscription");
            }
            subscription.cancel();
            return;
        }

        // Upgrading only fails while the last strong reference is dropping.
        let Some(me) = self.me.upgrade() else {
            subscription.cancel();
            return;
        };
        self.downstream.on_subscribe(me);

        if !self.is_cancelled() {
            subscription.request(UNBOUNDED);
        }
    }

    fn on_next(&self, value: T) {
        if self.is_cancelled() {
            self.drop_value(value, DropReason::Cancelled);
            return;
        }
        if self.done.load(Ordering::Acquire) {
            self.drop_value(value, DropReason::AfterTerminal);
            return;
        }

        let previous = self.pending.lock().replace(value);
        if let Some(previous) = previous {
            self.drop_value(previous, DropReason::Overwritten);
        }

        self.drain();

        // A cancel racing with this arrival may have missed the new value.
        if self.is_cancelled() {
            self.clear_pending(DropReason::Cancelled);
        }
    }

    fn on_error(&self, error: RelayError) {
        if self.done.load(Ordering::Acquire) {
            tracing::warn!(relay_id = self.id, %error, "error dropped, relay already terminated");
            return;
        }
        if let Err(error) = self.error.set(error) {
            tracing::warn!(relay_id = self.id, %error, "error dropped, relay already failed");
            return;
        }
        self.done.store(true, Ordering::Release);
        self.drain();
    }

    fn on_complete(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        self.drain();
    }
}

// ============================================================================
// Consumer-facing side
// ============================================================================

impl<T: Send + 'static> Subscription for LatestRelay<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            self.bad_request(n);
            return;
        }
        demand::add_cap(&self.requested, n);
        self.drain();
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(relay_id = self.id, "cancelled by downstream");

        if let Some(upstream) = self.detach_upstream(Upstream::Cancelled) {
            upstream.cancel();
        }

        // Permanently claims `wip`: if nobody is draining we own the slot,
        // otherwise the active drainer observes `cancelled` on its next pass.
        if self.wip.fetch_add(1, Ordering::AcqRel) == 0 {
            self.clear_pending(DropReason::Cancelled);
        }
    }
}

// ============================================================================
// Introspection
// ============================================================================

impl<T: Send + 'static> Scannable for LatestRelay<T> {
    fn scan(&self, attr: Attr) -> Option<AttrValue> {
        match attr {
            Attr::Actual => Some(AttrValue::Handle(HandleRef::of(&self.downstream))),
            Attr::Parent => self
                .upstream()
                .map(|upstream| AttrValue::Handle(HandleRef::of(&upstream))),
            Attr::RequestedFromDownstream => Some(AttrValue::Demand(self.requested())),
            Attr::Prefetch => Some(AttrValue::Demand(Demand::Unbounded)),
            Attr::Buffered => Some(AttrValue::Count(usize::from(self.has_pending()))),
            Attr::Error => self.error().map(AttrValue::Error),
            Attr::Terminated => Some(AttrValue::Flag(self.is_terminated())),
            Attr::Cancelled => Some(AttrValue::Flag(self.is_cancelled())),
            Attr::Name => Some(AttrValue::Name(self.name())),
        }
    }
}

impl<T> std::fmt::Debug for LatestRelay<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatestRelay")
            .field("id", &self.id)
            .field("requested", &Demand::from_raw(self.requested.load(Ordering::Acquire)))
            .field("has_pending", &self.pending.lock().is_some())
            .field("done", &self.done.load(Ordering::Acquire))
            .field("cancelled", &self.cancelled.load(Ordering::Acquire))
            .finish()
    }
}
