use futures::stream::{FusedStream, Stream};
use futures::task::AtomicWaker;
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::config::LatestConfig;
use crate::error::RelayError;
use crate::publisher::Publisher;
use crate::relay::LatestRelay;
use crate::subscription::{Subscriber, Subscription};

struct StreamState<T> {
    subscription: Option<Arc<dyn Subscription>>,
    item: Option<T>,
    /// One value requested and not yet received.
    outstanding: bool,
    terminal: Option<Result<(), RelayError>>,
    finished: bool,
}

/// Subscriber half of a [`LatestStream`], fed by the relay.
struct StreamSubscriber<T> {
    state: Mutex<StreamState<T>>,
    waker: AtomicWaker,
}

impl<T: Send> Subscriber<T> for StreamSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.state.lock().subscription = Some(subscription);
        self.waker.wake();
    }

    fn on_next(&self, value: T) {
        {
            let mut state = self.state.lock();
            state.item = Some(value);
            state.outstanding = false;
        }
        self.waker.wake();
    }

    fn on_error(&self, error: RelayError) {
        {
            let mut state = self.state.lock();
            state.terminal = Some(Err(error));
            state.subscription = None;
        }
        self.waker.wake();
    }

    fn on_complete(&self) {
        {
            let mut state = self.state.lock();
            state.terminal = Some(Ok(()));
            state.subscription = None;
        }
        self.waker.wake();
    }
}

// ============================================================================
// LatestStream
// ============================================================================

/// Async pull adapter over a latest-value relay.
///
/// Each poll requests exactly one value, so a slow consumer never sees a
/// backlog: whatever the producer emitted most recently is what the next
/// `next().await` yields. A failure is yielded once as `Err`, after which the
/// stream ends.
///
/// Dropping the stream cancels the subscription.
pub struct LatestStream<T> {
    inner: Arc<StreamSubscriber<T>>,
}

impl<T: Send + 'static> LatestStream<T> {
    /// Subscribe to `publisher` through a default-configured relay.
    pub fn subscribe<P: Publisher<T> + ?Sized>(publisher: &P) -> Self {
        Self::subscribe_with(publisher, LatestConfig::default())
    }

    pub fn subscribe_with<P: Publisher<T> + ?Sized>(publisher: &P, config: LatestConfig<T>) -> Self {
        let inner = Arc::new(StreamSubscriber {
            state: Mutex::new(StreamState {
                subscription: None,
                item: None,
                outstanding: false,
                terminal: None,
                finished: false,
            }),
            waker: AtomicWaker::new(),
        });
        let relay = LatestRelay::with_config(inner.clone(), config);
        publisher.subscribe(relay);
        Self { inner }
    }
}

impl<T: Send + 'static> Stream for LatestStream<T> {
    type Item = Result<T, RelayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // Register before inspecting state so a delivery racing with this
        // poll still wakes us.
        self.inner.waker.register(cx.waker());

        loop {
            let subscription = {
                let mut state = self.inner.state.lock();
                if let Some(item) = state.item.take() {
                    return Poll::Ready(Some(Ok(item)));
                }
                match state.terminal.take() {
                    Some(Ok(())) => {
                        state.finished = true;
                        return Poll::Ready(None);
                    }
                    Some(Err(error)) => {
                        state.finished = true;
                        return Poll::Ready(Some(Err(error)));
                    }
                    None if state.finished => return Poll::Ready(None),
                    None => {}
                }
                if state.outstanding {
                    return Poll::Pending;
                }
                match state.subscription.clone() {
                    Some(subscription) => {
                        state.outstanding = true;
                        subscription
                    }
                    None => return Poll::Pending,
                }
            };

            // The relay may deliver synchronously, so the lock must be
            // released before requesting.
            subscription.request(1);
        }
    }
}

impl<T: Send + 'static> FusedStream for LatestStream<T> {
    fn is_terminated(&self) -> bool {
        self.inner.state.lock().finished
    }
}

impl<T> Drop for LatestStream<T> {
    fn drop(&mut self) {
        let subscription = self.inner.state.lock().subscription.take();
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }
}

impl<T> std::fmt::Debug for LatestStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("LatestStream")
            .field("subscribed", &state.subscription.is_some())
            .field("has_item", &state.item.is_some())
            .field("outstanding", &state.outstanding)
            .field("finished", &state.finished)
            .finish()
    }
}
