/// Why a relay discarded a value instead of delivering it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// A newer value arrived while this one was still pending.
    Overwritten,
    /// The value arrived after upstream had already terminated.
    AfterTerminal,
    /// The downstream cancelled while the value was pending or arriving.
    Cancelled,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::Overwritten => write!(f, "overwritten"),
            DropReason::AfterTerminal => write!(f, "after-terminal"),
            DropReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Event emitted when a value is dropped because the consumer was too slow
/// or no longer listening.
///
/// Register a handler with [`LatestConfig::on_dropped`](crate::LatestConfig::on_dropped)
/// to monitor how much a pipeline is shedding.
#[derive(Clone, Debug)]
pub struct Dropped<T> {
    /// The ID of the relay where the drop occurred.
    pub relay_id: u64,
    /// Why the value was dropped.
    pub reason: DropReason,
    /// The dropped value itself, handed over for cleanup.
    pub value: T,
}
