//! Apply outcome reporting

use crate::changeset::Action;
use serde::Serialize;
use std::collections::BTreeMap;
use stratus_template::Value;

/// What an apply pass did: which resources changed, which failed, what was
/// rolled back and what could not be, plus the resolved stack outputs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    /// Stack name
    pub stack: String,

    /// Resources whose operation completed, in completion order
    pub succeeded: Vec<String>,

    /// Resources whose operation failed
    pub failed: Vec<FailedResource>,

    /// Previously-completed resources that were reverted after a failure
    pub rolled_back: Vec<String>,

    /// Compensations that themselves failed; these resources are in an
    /// unknown state and need manual attention
    pub rollback_failures: Vec<RollbackFailure>,

    /// Stack outputs, resolved only when every entry succeeded
    pub outputs: BTreeMap<String, Value>,

    /// Wall-clock duration of the pass
    pub duration_ms: u64,

    /// The pass was cut short by an abort signal
    pub aborted: bool,
}

impl ApplyReport {
    /// True when everything applied and nothing was rolled back.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.aborted
    }

    pub fn has_rollback_failures(&self) -> bool {
        !self.rollback_failures.is_empty()
    }
}

/// One resource whose provider operation failed.
#[derive(Debug, Clone, Serialize)]
pub struct FailedResource {
    pub resource_id: String,
    pub action: Action,
    pub error: String,
}

/// One compensation that failed during rollback.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackFailure {
    pub resource_id: String,
    /// The compensating action that was attempted
    pub attempted: String,
    pub error: String,
}
