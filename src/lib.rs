mod config;
mod demand;
mod error;
mod events;
mod publisher;
mod relay;
mod scan;
mod stream;
mod subscription;

pub mod testing;

pub use config::{BadRequestPolicy, DropHandler, LatestConfig};
pub use demand::{Demand, UNBOUNDED};
pub use error::{PanicError, ProtocolViolation, RelayError};
pub use events::{DropReason, Dropped};

// The relay itself and the traits it plugs into
pub use relay::LatestRelay;
pub use subscription::{Subscriber, Subscription};

pub use publisher::{OnBackpressureLatest, Publisher, PublisherExt};
pub use scan::{Attr, AttrValue, HandleRef, Scannable};
pub use stream::LatestStream;

// Demand arithmetic, exposed for producers that keep their own counters
pub use demand::{add_cap, produced};
