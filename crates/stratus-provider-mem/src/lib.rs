//! In-memory provider for Stratus
//!
//! A fully functional [`ResourceProvider`] backed by a process-local table,
//! with deterministic physical ids, realistic per-type attributes and fault
//! injection. This is what `--provider memory` selects and what the engine's
//! integration tests drive.
//!
//! [`ResourceProvider`]: stratus_provider::ResourceProvider

pub mod faults;
pub mod provider;

pub use faults::Op;
pub use provider::*;
