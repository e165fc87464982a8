//! Test doubles for demand-driven streams.
//!
//! [`TestSubscriber`] records everything a producer delivers and flags
//! protocol breaches (overlapping callbacks, repeated terminals).
//! [`DirectSource`] is a producer driven by hand, and [`IterSource`] emits
//! an iterator while honoring demand.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::demand::{self, Demand, UNBOUNDED};
use crate::error::{ProtocolViolation, RelayError};
use crate::publisher::Publisher;
use crate::subscription::{Subscriber, Subscription};

/// How a subscription ended.
#[derive(Debug, Clone)]
pub enum Terminal {
    Complete,
    Error(RelayError),
}

type NextHook<T> = Box<dyn Fn(&T) + Send + Sync>;
type TerminalHook = Box<dyn Fn(&Terminal) + Send + Sync>;

// ============================================================================
// TestSubscriber
// ============================================================================

/// Recording subscriber.
///
/// Requests `initial_request` values on subscribe (nothing when zero).
///
/// ## Protocol checks
///
/// - `overlaps()` counts callbacks that started while another was running.
/// - `terminal_count()` counts terminal signals; more than one is a bug.
pub struct TestSubscriber<T> {
    initial_request: u64,
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
    values: Mutex<Vec<T>>,
    terminal: Mutex<Option<Terminal>>,
    terminal_count: AtomicUsize,
    in_callback: AtomicBool,
    overlaps: AtomicUsize,
    on_next_hook: Option<NextHook<T>>,
    on_terminal_hook: Option<TerminalHook>,
    notify: Notify,
}

impl<T: Send + 'static> TestSubscriber<T> {
    pub fn new(initial_request: u64) -> Arc<Self> {
        Arc::new(Self::build(initial_request, None, None))
    }

    /// Subscriber that requests unbounded demand up front.
    pub fn unbounded() -> Arc<Self> {
        Self::new(UNBOUNDED)
    }

    /// Run `hook` on each value inside `on_next`, before it is recorded.
    pub fn with_on_next<F>(initial_request: u64, hook: F) -> Arc<Self>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Arc::new(Self::build(initial_request, Some(Box::new(hook)), None))
    }

    /// Run `hook` on the terminal signal, after it is recorded.
    pub fn with_on_terminal<F>(initial_request: u64, hook: F) -> Arc<Self>
    where
        F: Fn(&Terminal) + Send + Sync + 'static,
    {
        Arc::new(Self::build(initial_request, None, Some(Box::new(hook))))
    }

    fn build(
        initial_request: u64,
        on_next_hook: Option<NextHook<T>>,
        on_terminal_hook: Option<TerminalHook>,
    ) -> Self {
        Self {
            initial_request,
            subscription: Mutex::new(None),
            values: Mutex::new(Vec::new()),
            terminal: Mutex::new(None),
            terminal_count: AtomicUsize::new(0),
            in_callback: AtomicBool::new(false),
            overlaps: AtomicUsize::new(0),
            on_next_hook,
            on_terminal_hook,
            notify: Notify::new(),
        }
    }

    pub fn subscription(&self) -> Option<Arc<dyn Subscription>> {
        self.subscription.lock().clone()
    }

    /// Request more values through the received subscription.
    pub fn request(&self, n: u64) {
        if let Some(subscription) = self.subscription() {
            subscription.request(n);
        }
    }

    pub fn cancel(&self) {
        if let Some(subscription) = self.subscription() {
            subscription.cancel();
        }
    }

    pub fn value_count(&self) -> usize {
        self.values.lock().len()
    }

    pub fn terminal(&self) -> Option<Terminal> {
        self.terminal.lock().clone()
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.terminal(), Some(Terminal::Complete))
    }

    pub fn error(&self) -> Option<RelayError> {
        match self.terminal() {
            Some(Terminal::Error(error)) => Some(error),
            _ => None,
        }
    }

    pub fn terminal_count(&self) -> usize {
        self.terminal_count.load(Ordering::SeqCst)
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    /// Wait until a terminal signal has been received.
    pub async fn wait_terminal(&self) {
        loop {
            let notified = self.notify.notified();
            futures::pin_mut!(notified);
            // Register before checking so a concurrent terminal is not missed.
            notified.as_mut().enable();
            if self.terminal.lock().is_some() {
                return;
            }
            notified.await;
        }
    }

    fn enter(&self) {
        if self.in_callback.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn exit(&self) {
        self.in_callback.store(false, Ordering::SeqCst);
    }

    fn terminate(&self, terminal: Terminal) {
        self.enter();
        self.terminal_count.fetch_add(1, Ordering::SeqCst);
        let received = self.on_terminal_hook.as_ref().map(|_| terminal.clone());
        {
            let mut slot = self.terminal.lock();
            if slot.is_none() {
                *slot = Some(terminal);
            }
        }
        self.subscription.lock().take();
        self.exit();
        self.notify.notify_waiters();
        if let (Some(hook), Some(received)) = (&self.on_terminal_hook, received) {
            hook(&received);
        }
    }
}

impl<T: Clone + Send + 'static> TestSubscriber<T> {
    pub fn values(&self) -> Vec<T> {
        self.values.lock().clone()
    }
}

impl<T: Send + 'static> Subscriber<T> for TestSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        *self.subscription.lock() = Some(Arc::clone(&subscription));
        if self.initial_request > 0 {
            subscription.request(self.initial_request);
        }
    }

    fn on_next(&self, value: T) {
        self.enter();
        if let Some(hook) = &self.on_next_hook {
            hook(&value);
        }
        self.values.lock().push(value);
        self.exit();
    }

    fn on_error(&self, error: RelayError) {
        self.terminate(Terminal::Error(error));
    }

    fn on_complete(&self) {
        self.terminate(Terminal::Complete);
    }
}

impl<T> std::fmt::Debug for TestSubscriber<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestSubscriber")
            .field("values", &self.values.lock().len())
            .field("terminal", &*self.terminal.lock())
            .field("overlaps", &self.overlaps.load(Ordering::SeqCst))
            .finish()
    }
}

// ============================================================================
// DirectSource
// ============================================================================

struct DirectHandle {
    requested: AtomicU64,
    request_calls: AtomicUsize,
    cancelled: AtomicBool,
}

impl Subscription for DirectHandle {
    fn request(&self, n: u64) {
        self.request_calls.fetch_add(1, Ordering::SeqCst);
        demand::add_cap(&self.requested, n);
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Hand-driven producer for a single subscriber.
///
/// Values are pushed regardless of demand, like a hot source; the recorded
/// demand and cancellation are available for assertions.
pub struct DirectSource<T> {
    handle: Arc<DirectHandle>,
    subscriber: Arc<Mutex<Option<Arc<dyn Subscriber<T>>>>>,
}

impl<T: Send + 'static> DirectSource<T> {
    pub fn new() -> Self {
        Self {
            handle: Arc::new(DirectHandle {
                requested: AtomicU64::new(0),
                request_calls: AtomicUsize::new(0),
                cancelled: AtomicBool::new(false),
            }),
            subscriber: Arc::new(Mutex::new(None)),
        }
    }

    /// The handle given to the subscriber in `on_subscribe`.
    pub fn handle(&self) -> Arc<dyn Subscription> {
        self.handle.clone()
    }

    fn current(&self) -> Option<Arc<dyn Subscriber<T>>> {
        if self.handle.cancelled.load(Ordering::SeqCst) {
            return None;
        }
        self.subscriber.lock().clone()
    }

    pub fn next(&self, value: T) {
        if let Some(subscriber) = self.current() {
            subscriber.on_next(value);
        }
    }

    pub fn complete(&self) {
        let subscriber = self.subscriber.lock().take();
        if let Some(subscriber) = subscriber {
            subscriber.on_complete();
        }
    }

    pub fn error(&self, error: RelayError) {
        let subscriber = self.subscriber.lock().take();
        if let Some(subscriber) = subscriber {
            subscriber.on_error(error);
        }
    }

    pub fn requested(&self) -> Demand {
        Demand::from_raw(self.handle.requested.load(Ordering::SeqCst))
    }

    pub fn request_calls(&self) -> usize {
        self.handle.request_calls.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.cancelled.load(Ordering::SeqCst)
    }

    pub fn has_subscriber(&self) -> bool {
        self.subscriber.lock().is_some()
    }
}

impl<T: Send + 'static> Default for DirectSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for DirectSource<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            subscriber: self.subscriber.clone(),
        }
    }
}

impl<T: Send + 'static> Publisher<T> for DirectSource<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        *self.subscriber.lock() = Some(Arc::clone(&subscriber));
        subscriber.on_subscribe(self.handle());
    }
}

// ============================================================================
// IterSource
// ============================================================================

/// Cold producer that emits the items of an iterator, never more than
/// requested, then completes.
pub struct IterSource<I> {
    items: I,
}

impl<I> IterSource<I> {
    pub fn new(items: I) -> Self {
        Self { items }
    }
}

/// Emit `count` values from `start`, stopping short at `u64::MAX`.
pub fn range(start: u64, count: u64) -> IterSource<std::ops::Range<u64>> {
    IterSource::new(start..start.saturating_add(count))
}

struct IterSubscription<It: Iterator> {
    iter: Mutex<It>,
    subscriber: Arc<dyn Subscriber<It::Item>>,
    requested: AtomicU64,
    wip: AtomicUsize,
    cancelled: AtomicBool,
}

impl<It> IterSubscription<It>
where
    It: Iterator + Send,
    It::Item: Send + 'static,
{
    fn emit(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1;
        loop {
            let requested = self.requested.load(Ordering::Acquire);
            let mut emitted = 0u64;
            while emitted != requested {
                if self.cancelled.load(Ordering::Acquire) {
                    return;
                }
                let next = self.iter.lock().next();
                match next {
                    Some(item) => {
                        self.subscriber.on_next(item);
                        emitted += 1;
                    }
                    None => {
                        self.cancelled.store(true, Ordering::Release);
                        self.subscriber.on_complete();
                        return;
                    }
                }
            }
            if emitted != 0 {
                demand::produced(&self.requested, emitted);
            }
            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                break;
            }
        }
    }
}

impl<It> Subscription for IterSubscription<It>
where
    It: Iterator + Send,
    It::Item: Send + 'static,
{
    fn request(&self, n: u64) {
        if n == 0 {
            if !self.cancelled.swap(true, Ordering::AcqRel) {
                self.subscriber
                    .on_error(ProtocolViolation::NonPositiveRequest(n).into());
            }
            return;
        }
        demand::add_cap(&self.requested, n);
        self.emit();
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

impl<I> Publisher<I::Item> for IterSource<I>
where
    I: IntoIterator + Clone + Send + Sync,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<I::Item>>) {
        let subscription = Arc::new(IterSubscription {
            iter: Mutex::new(self.items.clone().into_iter()),
            subscriber: Arc::clone(&subscriber),
            requested: AtomicU64::new(0),
            wip: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
        });
        subscriber.on_subscribe(subscription);
    }
}
