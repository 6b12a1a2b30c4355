//! Change set execution
//!
//! Applies a change set against a provider with bounded parallelism. Each
//! entry moves `Pending -> InProgress -> Succeeded | Failed`; an entry is
//! dispatched the instant its dependencies have succeeded, deferred values
//! are resolved just before dispatch, and every completion commits that
//! resource's state record before anything else is marked done. The
//! scheduler loop is the only writer of attributes and state, so no lock
//! is shared with the operation tasks.

use crate::changeset::{Action, ChangeEntry, ChangeSet, PropValue, ReplaceOrder};
use crate::context::StackContext;
use crate::error::{EngineError, Result};
use crate::graph::Graph;
use crate::report::{ApplyReport, FailedResource};
use crate::rollback::{run_rollback, CompletedOp, PartialProgress, PartialReplace};
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use stratus_provider::{
    Created, ProviderError, ResolvedProperties, ResourceProvider, RetryConfig,
};
use stratus_state::{StateRecord, StateStore};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Tuning knobs for an apply pass.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum provider calls in flight at once; floored at 1
    pub parallelism: usize,

    /// Backoff for transient provider errors
    pub retry: RetryConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

/// A fully resolved provider operation, ready to run.
enum Operation {
    Create {
        resource_id: String,
        resource_type: String,
        properties: ResolvedProperties,
    },
    Update {
        resource_type: String,
        physical_id: String,
        properties: ResolvedProperties,
    },
    Delete {
        resource_type: String,
        physical_id: String,
    },
    Replace {
        resource_id: String,
        resource_type: String,
        old_physical_id: String,
        properties: ResolvedProperties,
        order: ReplaceOrder,
    },
}

enum TaskOutput {
    Created(Created),
    Updated(stratus_provider::Attributes),
    Deleted,
    Replaced { new: Created },
}

struct TaskFailure {
    error: ProviderError,
    partial: Option<PartialReplace>,
}

impl From<ProviderError> for TaskFailure {
    fn from(error: ProviderError) -> Self {
        Self {
            error,
            partial: None,
        }
    }
}

type TaskResult = (usize, std::result::Result<TaskOutput, TaskFailure>);
type TaskFuture = Pin<Box<dyn Future<Output = TaskResult> + Send>>;

pub struct Executor {
    provider: Arc<dyn ResourceProvider>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(provider: Arc<dyn ResourceProvider>) -> Self {
        Self {
            provider,
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_config(provider: Arc<dyn ResourceProvider>, mut config: ExecutorConfig) -> Self {
        // A parallelism of zero would dispatch nothing and report a clean
        // apply; floor it at one.
        config.parallelism = config.parallelism.max(1);
        Self { provider, config }
    }

    /// Apply a change set. On failure or abort, completed operations are
    /// rolled back before this returns; the report carries both outcomes.
    #[tracing::instrument(skip_all, fields(stack = %ctx.template.name))]
    pub async fn apply(
        &self,
        changeset: &ChangeSet,
        graph: &Graph,
        ctx: &StackContext<'_>,
        store: &mut StateStore,
        mut abort: watch::Receiver<bool>,
    ) -> Result<ApplyReport> {
        let started = Instant::now();
        let entries = &changeset.entries;

        let index_of: HashMap<&str, usize> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.resource_id.as_str(), i))
            .collect();
        let delete_blockers = delete_blockers(entries);

        let mut states: Vec<EntryState> = entries
            .iter()
            .map(|e| match e.action {
                Action::NoOp => EntryState::Succeeded,
                _ => EntryState::Pending,
            })
            .collect();
        let mut resolved: Vec<Option<ResolvedProperties>> = vec![None; entries.len()];

        // Attribute context for just-in-time resolution: state attributes
        // overlaid with fresh ones as operations complete
        let mut attrs = store.state().attribute_context();

        let mut in_flight: FuturesUnordered<TaskFuture> = FuturesUnordered::new();
        let mut completed: Vec<CompletedOp> = Vec::new();
        let mut partials: Vec<PartialProgress> = Vec::new();
        let mut succeeded: Vec<String> = Vec::new();
        let mut failed: Vec<FailedResource> = Vec::new();

        let mut aborted = *abort.borrow_and_update();
        let mut halted = aborted;
        let mut abort_closed = false;

        debug!(
            entries = entries.len(),
            parallelism = self.config.parallelism,
            "Starting apply"
        );

        loop {
            while !halted && in_flight.len() < self.config.parallelism {
                let ready = (0..entries.len()).find(|&i| {
                    states[i] == EntryState::Pending
                        && entry_ready(&entries[i], graph, &index_of, &delete_blockers[i], &states)
                });
                let Some(i) = ready else { break };
                let entry = &entries[i];

                match build_operation(entry, ctx, &attrs) {
                    Ok((operation, properties)) => {
                        debug!(resource = %entry.resource_id, action = %entry.action, "Dispatching");
                        resolved[i] = properties;
                        states[i] = EntryState::InProgress;
                        let provider = Arc::clone(&self.provider);
                        let retry = self.config.retry.clone();
                        in_flight.push(Box::pin(async move {
                            (i, run_operation(provider.as_ref(), &retry, operation).await)
                        }));
                    }
                    Err(error) => {
                        // Resolution failures are permanent; no provider
                        // call was made for this entry
                        warn!(resource = %entry.resource_id, error = %error, "Halting apply");
                        states[i] = EntryState::Failed;
                        failed.push(FailedResource {
                            resource_id: entry.resource_id.clone(),
                            action: entry.action,
                            error: error.to_string(),
                        });
                        halted = true;
                    }
                }
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                Some((i, result)) = in_flight.next() => {
                    let entry = &entries[i];
                    match result {
                        Ok(output) => {
                            states[i] = EntryState::Succeeded;
                            self.commit(entry, output, resolved[i].take(), &mut attrs, &mut completed, store)
                                .await?;
                            debug!(resource = %entry.resource_id, "Completed");
                            succeeded.push(entry.resource_id.clone());
                        }
                        Err(failure) => {
                            warn!(resource = %entry.resource_id, error = %failure.error, "Halting apply");
                            states[i] = EntryState::Failed;
                            failed.push(FailedResource {
                                resource_id: entry.resource_id.clone(),
                                action: entry.action,
                                error: failure.error.to_string(),
                            });
                            if let Some(partial) = failure.partial {
                                partials.push(PartialProgress {
                                    resource_id: entry.resource_id.clone(),
                                    resource_type: resource_type_of(entry),
                                    before: entry.before.clone(),
                                    partial,
                                });
                            }
                            halted = true;
                        }
                    }
                }
                changed = abort.changed(), if !aborted && !abort_closed => {
                    match changed {
                        Ok(()) if *abort.borrow() => {
                            info!("Abort requested, draining in-flight operations");
                            aborted = true;
                            halted = true;
                        }
                        Ok(()) => {}
                        Err(_) => abort_closed = true,
                    }
                }
            }
        }

        let (rolled_back, rollback_failures) = if halted {
            info!(completed = completed.len(), "Rolling back");
            run_rollback(
                self.provider.as_ref(),
                &self.config.retry,
                partials,
                completed,
                store,
            )
            .await
        } else {
            (Vec::new(), Vec::new())
        };

        let outputs = if !halted {
            let outputs = resolve_outputs(ctx, &attrs)?;
            store.set_outputs(outputs.clone()).await?;
            outputs
        } else {
            BTreeMap::new()
        };

        Ok(ApplyReport {
            stack: ctx.template.name.clone(),
            succeeded,
            failed,
            rolled_back,
            rollback_failures,
            outputs,
            duration_ms: started.elapsed().as_millis() as u64,
            aborted,
        })
    }

    /// Publish attributes, remember the undo, and persist the record. Runs
    /// in the scheduler loop, never concurrently.
    async fn commit(
        &self,
        entry: &ChangeEntry,
        output: TaskOutput,
        resolved: Option<ResolvedProperties>,
        attrs: &mut HashMap<String, HashMap<String, String>>,
        completed: &mut Vec<CompletedOp>,
        store: &mut StateStore,
    ) -> Result<()> {
        let id = &entry.resource_id;
        let properties = resolved.unwrap_or_default();
        let dependencies = entry
            .desired
            .as_ref()
            .map(|d| d.dependencies.clone())
            .unwrap_or_default();

        match output {
            TaskOutput::Created(created) => {
                attrs.insert(id.clone(), attribute_map(&created.attributes));
                completed.push(CompletedOp::Created {
                    resource_id: id.clone(),
                    resource_type: resource_type_of(entry),
                    physical_id: created.physical_id.clone(),
                });
                let record = StateRecord::new(resource_type_of(entry), created.physical_id)
                    .with_properties(properties)
                    .with_attributes(created.attributes)
                    .with_dependencies(dependencies);
                store.commit_record(id, record).await?;
            }
            TaskOutput::Updated(attributes) => {
                attrs.insert(id.clone(), attribute_map(&attributes));
                let Some(before) = entry.before.clone() else {
                    return Err(EngineError::MissingSnapshot(id.clone()));
                };
                completed.push(CompletedOp::Updated {
                    resource_id: id.clone(),
                    resource_type: before.resource_type.clone(),
                    physical_id: before.physical_id.clone(),
                    before: before.clone(),
                });
                let mut record = before;
                record.properties = properties;
                record.attributes = attributes;
                record.dependencies = dependencies;
                record.updated_at = chrono::Utc::now();
                store.commit_record(id, record).await?;
            }
            TaskOutput::Deleted => {
                attrs.remove(id);
                let Some(before) = entry.before.clone() else {
                    return Err(EngineError::MissingSnapshot(id.clone()));
                };
                completed.push(CompletedOp::Deleted {
                    resource_id: id.clone(),
                    before,
                });
                store.remove_record(id).await?;
            }
            TaskOutput::Replaced { new } => {
                attrs.insert(id.clone(), attribute_map(&new.attributes));
                let Some(before) = entry.before.clone() else {
                    return Err(EngineError::MissingSnapshot(id.clone()));
                };
                completed.push(CompletedOp::Replaced {
                    resource_id: id.clone(),
                    resource_type: resource_type_of(entry),
                    new_physical_id: new.physical_id.clone(),
                    before,
                });
                let record = StateRecord::new(resource_type_of(entry), new.physical_id)
                    .with_properties(properties)
                    .with_attributes(new.attributes)
                    .with_dependencies(dependencies);
                store.commit_record(id, record).await?;
            }
        }
        Ok(())
    }
}

/// An entry is ready when everything it waits on has succeeded. Deletes
/// wait on the deletes of their dependents; everything else waits on its
/// graph dependencies.
fn entry_ready(
    entry: &ChangeEntry,
    graph: &Graph,
    index_of: &HashMap<&str, usize>,
    blockers: &[usize],
    states: &[EntryState],
) -> bool {
    if entry.action == Action::Delete {
        return blockers.iter().all(|&j| states[j] == EntryState::Succeeded);
    }
    match graph.node(&entry.resource_id) {
        Some(node) => node.dependencies.iter().all(|dep| {
            index_of
                .get(dep.as_str())
                .map(|&j| states[j] == EntryState::Succeeded)
                .unwrap_or(true)
        }),
        None => true,
    }
}

/// For each delete entry, the indices of delete entries that must finish
/// first because their recorded dependencies include it.
fn delete_blockers(entries: &[ChangeEntry]) -> Vec<Vec<usize>> {
    let mut blockers = vec![Vec::new(); entries.len()];
    for (i, entry) in entries.iter().enumerate() {
        if entry.action != Action::Delete {
            continue;
        }
        for (j, other) in entries.iter().enumerate() {
            if j == i || other.action != Action::Delete {
                continue;
            }
            let depends_on_entry = other
                .before
                .as_ref()
                .map(|b| b.dependencies.iter().any(|d| *d == entry.resource_id))
                .unwrap_or(false);
            if depends_on_entry {
                blockers[i].push(j);
            }
        }
    }
    blockers
}

/// Resolve any deferred properties and pin down the provider operation.
fn build_operation(
    entry: &ChangeEntry,
    ctx: &StackContext<'_>,
    attrs: &HashMap<String, HashMap<String, String>>,
) -> Result<(Operation, Option<ResolvedProperties>)> {
    let before = |entry: &ChangeEntry| -> Result<StateRecord> {
        entry
            .before
            .clone()
            .ok_or_else(|| EngineError::MissingSnapshot(entry.resource_id.clone()))
    };

    match entry.action {
        Action::Create => {
            let properties = resolve_properties(entry, ctx, attrs)?;
            Ok((
                Operation::Create {
                    resource_id: entry.resource_id.clone(),
                    resource_type: resource_type_of(entry),
                    properties: properties.clone(),
                },
                Some(properties),
            ))
        }
        Action::Update => {
            let properties = resolve_properties(entry, ctx, attrs)?;
            let before = before(entry)?;
            Ok((
                Operation::Update {
                    resource_type: before.resource_type,
                    physical_id: before.physical_id,
                    properties: properties.clone(),
                },
                Some(properties),
            ))
        }
        Action::Replace { order } => {
            let properties = resolve_properties(entry, ctx, attrs)?;
            let before = before(entry)?;
            Ok((
                Operation::Replace {
                    resource_id: entry.resource_id.clone(),
                    resource_type: resource_type_of(entry),
                    old_physical_id: before.physical_id,
                    properties: properties.clone(),
                    order,
                },
                Some(properties),
            ))
        }
        Action::Delete => {
            let before = before(entry)?;
            Ok((
                Operation::Delete {
                    resource_type: before.resource_type,
                    physical_id: before.physical_id,
                },
                None,
            ))
        }
        Action::NoOp => unreachable!("no-op entries start out succeeded and are never dispatched"),
    }
}

fn resolve_properties(
    entry: &ChangeEntry,
    ctx: &StackContext<'_>,
    attrs: &HashMap<String, HashMap<String, String>>,
) -> Result<ResolvedProperties> {
    let mut properties = ResolvedProperties::new();
    let Some(desired) = &entry.desired else {
        return Ok(properties);
    };
    let eval_ctx = ctx.eval_context(attrs);
    for (name, value) in &desired.properties {
        let value = match value {
            PropValue::Known(v) => v.clone(),
            PropValue::Deferred(expr) => {
                expr.eval(&eval_ctx).map_err(|source| EngineError::Resolve {
                    resource: entry.resource_id.clone(),
                    property: name.clone(),
                    source,
                })?
            }
        };
        properties.insert(name.clone(), value);
    }
    Ok(properties)
}

fn resolve_outputs(
    ctx: &StackContext<'_>,
    attrs: &HashMap<String, HashMap<String, String>>,
) -> Result<BTreeMap<String, stratus_template::Value>> {
    let eval_ctx = ctx.eval_context(attrs);
    let mut outputs = BTreeMap::new();
    for output in &ctx.template.outputs {
        let value = output
            .value
            .eval(&eval_ctx)
            .map_err(|source| EngineError::ResolveOutput {
                output: output.name.clone(),
                source,
            })?;
        outputs.insert(output.name.clone(), value);
    }
    Ok(outputs)
}

/// Resource type for an entry, from the desired state or the snapshot.
fn resource_type_of(entry: &ChangeEntry) -> String {
    entry
        .desired
        .as_ref()
        .map(|d| d.resource_type.clone())
        .or_else(|| entry.before.as_ref().map(|b| b.resource_type.clone()))
        .unwrap_or_default()
}

fn attribute_map(attributes: &stratus_provider::Attributes) -> HashMap<String, String> {
    attributes
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

async fn run_operation(
    provider: &dyn ResourceProvider,
    retry: &RetryConfig,
    operation: Operation,
) -> std::result::Result<TaskOutput, TaskFailure> {
    match operation {
        Operation::Create {
            resource_id,
            resource_type,
            properties,
        } => {
            let created = with_retry(retry, || {
                provider.create(&resource_type, &resource_id, &properties)
            })
            .await?;
            Ok(TaskOutput::Created(created))
        }
        Operation::Update {
            resource_type,
            physical_id,
            properties,
        } => {
            let attributes = with_retry(retry, || {
                provider.update(&resource_type, &physical_id, &properties)
            })
            .await?;
            Ok(TaskOutput::Updated(attributes))
        }
        Operation::Delete {
            resource_type,
            physical_id,
        } => {
            with_retry(retry, || provider.delete(&resource_type, &physical_id)).await?;
            Ok(TaskOutput::Deleted)
        }
        Operation::Replace {
            resource_id,
            resource_type,
            old_physical_id,
            properties,
            order,
        } => match order {
            ReplaceOrder::CreateThenDelete => {
                let new = with_retry(retry, || {
                    provider.create(&resource_type, &resource_id, &properties)
                })
                .await?;
                with_retry(retry, || provider.delete(&resource_type, &old_physical_id))
                    .await
                    .map_err(|error| TaskFailure {
                        error,
                        partial: Some(PartialReplace::CreatedNew {
                            new_physical_id: new.physical_id.clone(),
                        }),
                    })?;
                Ok(TaskOutput::Replaced { new })
            }
            ReplaceOrder::DeleteThenCreate => {
                with_retry(retry, || provider.delete(&resource_type, &old_physical_id)).await?;
                let new = with_retry(retry, || {
                    provider.create(&resource_type, &resource_id, &properties)
                })
                .await
                .map_err(|error| TaskFailure {
                    error,
                    partial: Some(PartialReplace::DeletedOld),
                })?;
                Ok(TaskOutput::Replaced { new })
            }
        },
    }
}

/// Retry transient errors with exponential backoff until the attempt
/// budget runs out. Permanent errors fail on the spot.
async fn with_retry<T, F, Fut>(
    retry: &RetryConfig,
    mut call: F,
) -> std::result::Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt + 1 < retry.max_attempts => {
                let delay = retry.delay_for_attempt(attempt);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient provider error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
