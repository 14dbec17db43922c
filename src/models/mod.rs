//! Data models for the relay.
//!
//! Records are rebuilt on every fetch; snapshots are the durable comparison
//! baseline; queue items are what the consumer finally receives.

mod change;
mod queue;
mod record;
mod snapshot;
mod source;

pub use change::*;
pub use queue::*;
pub use record::*;
pub use snapshot::*;
pub use source::*;
