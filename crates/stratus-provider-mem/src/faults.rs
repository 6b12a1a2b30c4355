//! Fault injection for the in-memory provider

use std::collections::HashMap;
use stratus_provider::ProviderError;

/// Provider operation, for fault targeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    Update,
    Delete,
    Describe,
}

#[derive(Debug, Clone)]
enum Fault {
    /// Fails on every call
    Permanent(ProviderError),
    /// Fails `remaining` more times, then succeeds
    Transient { remaining: u32 },
}

/// Injection table keyed by operation and logical resource id.
#[derive(Debug, Default)]
pub(crate) struct FaultPlan {
    faults: HashMap<(Op, String), Fault>,
}

impl FaultPlan {
    pub(crate) fn inject_permanent(&mut self, op: Op, resource_id: &str, error: ProviderError) {
        self.faults
            .insert((op, resource_id.to_string()), Fault::Permanent(error));
    }

    pub(crate) fn inject_transient(&mut self, op: Op, resource_id: &str, times: u32) {
        self.faults
            .insert((op, resource_id.to_string()), Fault::Transient { remaining: times });
    }

    /// Check the table for this call; decrements transient counters.
    pub(crate) fn check(&mut self, op: Op, resource_id: &str) -> Result<(), ProviderError> {
        let key = (op, resource_id.to_string());
        match self.faults.get_mut(&key) {
            Some(Fault::Permanent(error)) => Err(error.clone()),
            Some(Fault::Transient { remaining }) => {
                if *remaining == 0 {
                    self.faults.remove(&key);
                    return Ok(());
                }
                *remaining -= 1;
                Err(ProviderError::Unavailable(format!(
                    "injected transient fault for {resource_id}"
                )))
            }
            None => Ok(()),
        }
    }
}
