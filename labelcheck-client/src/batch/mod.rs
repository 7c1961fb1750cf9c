//! Batch tracking
//!
//! - [`progress`]: subscription state machine and its monotonic filter
//! - [`subscriber`]: owns the live progress stream for the watched handle
//! - [`results`]: completion gate and one-shot result materialization
//! - [`session`]: upload plus the two above, as one owner

pub mod progress;
pub mod results;
pub mod session;
pub mod subscriber;

pub use progress::{BatchProgress, ConnectionState};
pub use results::{BatchResults, CompletionGate};
pub use session::{BatchSession, BatchView};
pub use subscriber::{BatchProgressSubscriber, SubscriberConfig};
