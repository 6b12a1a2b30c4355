//! Stratus reconciliation engine
//!
//! Takes a parsed template and the recorded stack state and drives the
//! provider until they agree: builds the dependency graph, plans a change
//! set, executes it with bounded parallelism and retries, and rolls back
//! completed work when an operation fails or the pass is aborted.

pub mod changeset;
pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod planner;
pub mod policy;
pub mod report;
mod rollback;

pub use changeset::*;
pub use context::*;
pub use error::*;
pub use executor::*;
pub use graph::*;
pub use planner::*;
pub use policy::*;
pub use report::*;
