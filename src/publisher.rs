use std::sync::Arc;

use crate::config::LatestConfig;
use crate::relay::LatestRelay;
use crate::stream::LatestStream;
use crate::subscription::Subscriber;

/// A source of values that delivers to subscribers on demand.
pub trait Publisher<T>: Send + Sync {
    /// Start a subscription. The publisher must call `on_subscribe` before
    /// any other callback.
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>);
}

/// Publisher that puts a [`LatestRelay`] in front of every subscriber.
pub struct OnBackpressureLatest<P, T> {
    source: P,
    config: LatestConfig<T>,
}

impl<P, T> OnBackpressureLatest<P, T> {
    pub fn new(source: P, config: LatestConfig<T>) -> Self {
        Self { source, config }
    }

    pub fn source(&self) -> &P {
        &self.source
    }
}

impl<P, T> Publisher<T> for OnBackpressureLatest<P, T>
where
    P: Publisher<T>,
    T: Send + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let relay = LatestRelay::with_config(subscriber, self.config.clone());
        tracing::trace!(relay_id = relay.id(), "subscribing latest relay");
        self.source.subscribe(relay);
    }
}

// ============================================================================
// Extension trait
// ============================================================================

pub trait PublisherExt<T>: Publisher<T> + Sized {
    /// Keep only the latest value when the subscriber falls behind.
    fn on_backpressure_latest(self) -> OnBackpressureLatest<Self, T> {
        OnBackpressureLatest::new(self, LatestConfig::default())
    }

    /// Like [`on_backpressure_latest`](Self::on_backpressure_latest), with
    /// explicit configuration.
    fn on_backpressure_latest_with(self, config: LatestConfig<T>) -> OnBackpressureLatest<Self, T> {
        OnBackpressureLatest::new(self, config)
    }

    /// Consume this publisher as an async stream that always yields the
    /// freshest value available when polled.
    fn latest_stream(&self) -> LatestStream<T>
    where
        T: Send + 'static,
    {
        LatestStream::subscribe(self)
    }
}

impl<T, P: Publisher<T>> PublisherExt<T> for P {}
