//! Sync engine: change detection, snapshot upserts and per-source scheduling.

mod detect;
mod scheduler;
mod upsert;

pub use detect::*;
pub use scheduler::*;
pub use upsert::*;
