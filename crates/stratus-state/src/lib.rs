//! Stratus state persistence
//!
//! Tracks what a stack last successfully applied: one [`StateRecord`] per
//! live resource plus the resolved stack outputs, persisted to
//! `.stratus/state.json` with backup rotation and a lock file.

pub mod error;
pub mod record;
pub mod store;

pub use error::*;
pub use record::*;
pub use store::*;
