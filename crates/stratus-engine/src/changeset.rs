//! Change set types
//!
//! A change set is the ordered list of per-resource actions a plan produced:
//! what to create, update, replace or delete, the before-state snapshot, and
//! the desired after-state with any values that stay unknown until apply.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use stratus_state::StateRecord;
use stratus_template::{Expr, Value};

/// How a replacement interleaves the create and the delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceOrder {
    /// Create the successor first, then delete the old resource
    CreateThenDelete,
    /// Delete the old resource first; needed when the successor would
    /// collide with the old one's name
    DeleteThenCreate,
}

/// Planned action for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Create a new resource
    Create,
    /// Update an existing resource in place
    Update,
    /// Recreate the resource because an immutable property changed
    Replace { order: ReplaceOrder },
    /// Delete a resource no longer in the template
    Delete,
    /// No changes needed
    NoOp,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Create => write!(f, "create"),
            Action::Update => write!(f, "update"),
            Action::Replace { .. } => write!(f, "replace"),
            Action::Delete => write!(f, "delete"),
            Action::NoOp => write!(f, "no-op"),
        }
    }
}

/// A property value as known at plan time.
///
/// `Deferred` marks a value that reads attributes of a resource being
/// created or replaced in the same pass; it is re-resolved at apply time
/// once the upstream resource has published real attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropValue {
    Known(Value),
    Deferred(Expr),
}

impl PropValue {
    pub fn known(&self) -> Option<&Value> {
        match self {
            PropValue::Known(value) => Some(value),
            PropValue::Deferred(_) => None,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, PropValue::Deferred(_))
    }
}

impl std::fmt::Display for PropValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropValue::Known(value) => write!(f, "{}", value),
            PropValue::Deferred(_) => write!(f, "(known after apply)"),
        }
    }
}

/// What one resource should look like after apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesiredState {
    pub resource_type: String,
    pub properties: BTreeMap<String, PropValue>,
    /// Dependency ids, recorded into state for later delete ordering
    pub dependencies: Vec<String>,
}

/// One resource's entry in a change set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub resource_id: String,
    pub action: Action,
    /// Desired after-state; absent for deletes
    pub desired: Option<DesiredState>,
    /// State snapshot before the change; absent for creates
    pub before: Option<StateRecord>,
    /// Names of differing properties, for display
    pub changed_properties: Vec<String>,
}

/// Ordered set of planned changes. Creates, updates and replaces come first
/// in dependency order; deletes follow in reverse dependency order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    pub entries: Vec<ChangeEntry>,
}

impl ChangeSet {
    pub fn entry(&self, resource_id: &str) -> Option<&ChangeEntry> {
        self.entries.iter().find(|e| e.resource_id == resource_id)
    }

    pub fn has_changes(&self) -> bool {
        self.entries.iter().any(|e| e.action != Action::NoOp)
    }

    pub fn entries_with_action(&self, action: impl Fn(Action) -> bool) -> Vec<&ChangeEntry> {
        self.entries
            .iter()
            .filter(|e| action(e.action))
            .collect()
    }

    /// Summary of the planned actions.
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for entry in &self.entries {
            match entry.action {
                Action::Create => summary.create += 1,
                Action::Update => summary.update += 1,
                Action::Replace { .. } => summary.replace += 1,
                Action::Delete => summary.delete += 1,
                Action::NoOp => summary.no_change += 1,
            }
        }
        summary
    }
}

/// Counts of planned actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub no_change: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            self.create, self.update, self.replace, self.delete, self.no_change
        )
    }
}
