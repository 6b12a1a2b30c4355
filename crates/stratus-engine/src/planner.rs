//! Change planning
//!
//! Walks the graph in dependency order, resolves every property, diffs the
//! result against the recorded state and emits a change set. Values that
//! read attributes of a resource being created or replaced in the same pass
//! are deferred to apply time; everything else resolves here, before any
//! provider is touched.

use crate::changeset::{Action, ChangeEntry, ChangeSet, DesiredState, PropValue, ReplaceOrder};
use crate::context::StackContext;
use crate::error::{EngineError, Result};
use crate::graph::Graph;
use crate::policy::ReplacementPolicy;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use stratus_provider::{ProviderError, ResourceProvider};
use stratus_state::{StackState, StateRecord};
use stratus_template::Value;
use tracing::debug;

pub struct Planner {
    policy: ReplacementPolicy,
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}

impl Planner {
    pub fn new() -> Self {
        Self {
            policy: ReplacementPolicy::builtin(),
        }
    }

    pub fn with_policy(policy: ReplacementPolicy) -> Self {
        Self { policy }
    }

    /// Plan the changes that would make `state` match the template.
    #[tracing::instrument(skip_all, fields(stack = %ctx.template.name))]
    pub fn plan(
        &self,
        graph: &Graph,
        ctx: &StackContext<'_>,
        state: &StackState,
    ) -> Result<ChangeSet> {
        let mut attrs: HashMap<String, HashMap<String, String>> = HashMap::new();
        // Resources whose physical identity will be newly minted this pass
        let mut fresh: HashSet<String> = HashSet::new();
        let mut entries = Vec::new();

        for node in graph.topological_order() {
            let mut properties = BTreeMap::new();
            for (name, expr) in &node.properties {
                let reads_fresh = expr
                    .references()
                    .iter()
                    .any(|(target, _)| fresh.contains(*target));
                let value = if reads_fresh {
                    PropValue::Deferred(expr.clone())
                } else {
                    let eval_ctx = ctx.eval_context(&attrs);
                    match expr.eval(&eval_ctx) {
                        Ok(v) => PropValue::Known(v),
                        Err(source) => {
                            return Err(EngineError::Resolve {
                                resource: node.id.clone(),
                                property: name.clone(),
                                source,
                            });
                        }
                    }
                };
                properties.insert(name.clone(), value);
            }

            let desired = DesiredState {
                resource_type: node.resource_type.clone(),
                properties,
                dependencies: node.dependencies.clone(),
            };

            let entry = match state.record(&node.id) {
                None => {
                    fresh.insert(node.id.clone());
                    ChangeEntry {
                        resource_id: node.id.clone(),
                        action: Action::Create,
                        changed_properties: desired.properties.keys().cloned().collect(),
                        desired: Some(desired),
                        before: None,
                    }
                }
                Some(record) => {
                    let changed = diff_properties(&desired.properties, &record.properties);
                    if changed.is_empty() {
                        attrs.insert(node.id.clone(), attribute_map(record));
                        ChangeEntry {
                            resource_id: node.id.clone(),
                            action: Action::NoOp,
                            desired: Some(desired),
                            before: Some(record.clone()),
                            changed_properties: changed,
                        }
                    } else if changed
                        .iter()
                        .all(|p| !self.policy.is_immutable(&node.resource_type, p))
                    {
                        // In-place update keeps the physical identity, so
                        // downstream references stay resolvable now
                        attrs.insert(node.id.clone(), attribute_map(record));
                        ChangeEntry {
                            resource_id: node.id.clone(),
                            action: Action::Update,
                            desired: Some(desired),
                            before: Some(record.clone()),
                            changed_properties: changed,
                        }
                    } else {
                        fresh.insert(node.id.clone());
                        let order = self.replace_order(
                            &node.resource_type,
                            &desired.properties,
                            &record.properties,
                        );
                        ChangeEntry {
                            resource_id: node.id.clone(),
                            action: Action::Replace { order },
                            desired: Some(desired),
                            before: Some(record.clone()),
                            changed_properties: changed,
                        }
                    }
                }
            };
            entries.push(entry);
        }

        // Resources in state but no longer declared get deleted, dependents
        // before their dependencies
        let doomed: BTreeMap<String, StateRecord> = state
            .records
            .iter()
            .filter(|(id, _)| !graph.contains(id))
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect();
        for id in order_deletes(&doomed) {
            let before = doomed[&id].clone();
            entries.push(ChangeEntry {
                resource_id: id,
                action: Action::Delete,
                desired: None,
                before: Some(before),
                changed_properties: Vec::new(),
            });
        }

        let changeset = ChangeSet { entries };
        debug!(summary = %changeset.summary(), "Planned changes");
        Ok(changeset)
    }

    /// Create-before-delete unless the successor would take the same name
    /// as the resource it replaces.
    fn replace_order(
        &self,
        resource_type: &str,
        desired: &BTreeMap<String, PropValue>,
        before: &BTreeMap<String, Value>,
    ) -> ReplaceOrder {
        let Some(name_prop) = self.policy.naming_property(resource_type) else {
            return ReplaceOrder::CreateThenDelete;
        };
        match desired.get(name_prop) {
            None => ReplaceOrder::CreateThenDelete,
            Some(PropValue::Deferred(_)) => ReplaceOrder::DeleteThenCreate,
            Some(PropValue::Known(value)) => {
                if before.get(name_prop) == Some(value) {
                    ReplaceOrder::DeleteThenCreate
                } else {
                    ReplaceOrder::CreateThenDelete
                }
            }
        }
    }
}

/// Names of properties that differ between desired and recorded values.
/// Deferred values cannot be proven equal and always count as changed.
fn diff_properties(
    desired: &BTreeMap<String, PropValue>,
    before: &BTreeMap<String, Value>,
) -> Vec<String> {
    let mut changed = Vec::new();
    for (name, value) in desired {
        match value {
            PropValue::Deferred(_) => changed.push(name.clone()),
            PropValue::Known(v) => {
                if before.get(name) != Some(v) {
                    changed.push(name.clone());
                }
            }
        }
    }
    for name in before.keys() {
        if !desired.contains_key(name) {
            changed.push(name.clone());
        }
    }
    changed.sort();
    changed.dedup();
    changed
}

fn attribute_map(record: &StateRecord) -> HashMap<String, String> {
    record
        .attributes
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Order removed resources for deletion: dependents first, dependencies
/// last, using the dependency lists stored in their state records. Ids tie-
/// break lexicographically since removed resources have no declaration
/// order anymore.
fn order_deletes(doomed: &BTreeMap<String, StateRecord>) -> Vec<String> {
    let mut order: Vec<String> = Vec::with_capacity(doomed.len());
    let mut done: BTreeSet<&str> = BTreeSet::new();

    while order.len() < doomed.len() {
        let mut progressed = false;
        for (id, record) in doomed {
            if done.contains(id.as_str()) {
                continue;
            }
            let ready = record
                .dependencies
                .iter()
                .filter(|d| doomed.contains_key(*d))
                .all(|d| done.contains(d.as_str()));
            if ready {
                done.insert(id);
                order.push(id.clone());
                progressed = true;
            }
        }
        // Recorded dependencies were acyclic when written; tolerate a
        // hand-edited state file rather than spinning
        if !progressed {
            for id in doomed.keys() {
                if !done.contains(id.as_str()) {
                    done.insert(id);
                    order.push(id.clone());
                }
            }
        }
    }

    order.reverse();
    order
}

/// Fold live attributes into the state before planning, so drift in
/// provider-reported values is visible to downstream resolution. Returns
/// the resources that could not be described.
pub async fn refresh_state(
    provider: &dyn ResourceProvider,
    state: &mut StackState,
) -> Vec<(String, ProviderError)> {
    let mut failures = Vec::new();
    for (id, record) in state.records.iter_mut() {
        match provider
            .describe(&record.resource_type, &record.physical_id)
            .await
        {
            Ok(attributes) => record.attributes = attributes,
            Err(error) => failures.push((id.clone(), error)),
        }
    }
    failures
}
