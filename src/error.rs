use std::any::Any;
use std::sync::Arc;

/// Error carried by a terminal failure signal.
///
/// Errors are cloneable (via `Arc`) so the same failure can be captured by the
/// relay, reported through introspection and delivered downstream.
#[derive(Debug, Clone)]
pub struct RelayError {
    /// The underlying error.
    pub error: Arc<dyn std::error::Error + Send + Sync>,
    /// Coarse provenance indicator for the error source.
    ///
    /// This should be a compile-time constant string like "upstream", "relay"
    /// or "downstream". Not intended for user input.
    pub source: &'static str,
}

impl RelayError {
    /// Create a new RelayError.
    pub fn new<E: std::error::Error + Send + Sync + 'static>(
        error: E,
        source: &'static str,
    ) -> Self {
        Self {
            error: Arc::new(error),
            source,
        }
    }

    /// Create an upstream failure from a plain message.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(std::io::Error::other(message.into()), "upstream")
    }

    /// The message of the underlying error, without provenance.
    pub fn message(&self) -> String {
        self.error.to_string()
    }

    /// Returns `true` if both values share the same underlying error.
    pub fn same_as(&self, other: &RelayError) -> bool {
        Arc::ptr_eq(&self.error, &other.error)
    }
}

impl From<ProtocolViolation> for RelayError {
    fn from(violation: ProtocolViolation) -> Self {
        Self::new(violation, "relay")
    }
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.source, self.error)
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.error.as_ref())
    }
}

/// A collaborator broke the request/subscribe protocol.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// `request` was called with zero.
    #[error("request amount must be positive, got {0}")]
    NonPositiveRequest(u64),
    /// `on_subscribe` was called after a subscription was already set.
    #[error("subscription already set, on_subscribe must be called at most once")]
    DuplicateSubscription,
}

/// Wrapper for panic payloads, converting them to an Error type.
///
/// Panic payloads are intentionally lossy - we extract the message if it's
/// a string type, otherwise provide a generic indicator.
#[derive(Debug, Clone)]
pub struct PanicError {
    message: String,
}

impl PanicError {
    /// Create a PanicError from a panic payload.
    pub fn new(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic occurred (non-string payload)".to_string()
        };
        Self { message }
    }
}

impl std::fmt::Display for PanicError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "panic: {}", self.message)
    }
}

impl std::error::Error for PanicError {}
