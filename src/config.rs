use std::sync::Arc;

use crate::events::Dropped;

/// Handler invoked for each value a relay discards.
pub type DropHandler<T> = Arc<dyn Fn(Dropped<T>) + Send + Sync>;

/// What a relay does when its consumer requests zero values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BadRequestPolicy {
    /// Log the violation and ignore the request.
    #[default]
    Report,
    /// Cancel upstream and fail the consumer with the violation.
    Signal,
}

/// Configuration for a [`LatestRelay`](crate::LatestRelay).
///
/// ```ignore
/// let config = LatestConfig::new()
///     .on_dropped(|dropped| println!("shed {:?}", dropped.reason))
///     .bad_request(BadRequestPolicy::Signal);
/// ```
pub struct LatestConfig<T> {
    pub(crate) on_dropped: Option<DropHandler<T>>,
    pub(crate) bad_request: BadRequestPolicy,
}

impl<T> LatestConfig<T> {
    pub fn new() -> Self {
        Self {
            on_dropped: None,
            bad_request: BadRequestPolicy::default(),
        }
    }

    /// Receive every value the relay discards.
    ///
    /// The handler runs on whichever thread caused the drop and must not
    /// call back into the relay.
    pub fn on_dropped<F>(mut self, handler: F) -> Self
    where
        F: Fn(Dropped<T>) + Send + Sync + 'static,
    {
        self.on_dropped = Some(Arc::new(handler));
        self
    }

    pub fn bad_request(mut self, policy: BadRequestPolicy) -> Self {
        self.bad_request = policy;
        self
    }

    pub fn bad_request_policy(&self) -> BadRequestPolicy {
        self.bad_request
    }
}

impl<T> Default for LatestConfig<T> {
    fn default() -> Self {
        Self::new()
    }
}

// Manual impl: deriving would require `T: Clone`.
impl<T> Clone for LatestConfig<T> {
    fn clone(&self) -> Self {
        Self {
            on_dropped: self.on_dropped.clone(),
            bad_request: self.bad_request,
        }
    }
}

impl<T> std::fmt::Debug for LatestConfig<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatestConfig")
            .field("has_drop_handler", &self.on_dropped.is_some())
            .field("bad_request", &self.bad_request)
            .finish()
    }
}
