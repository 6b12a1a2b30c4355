//! Compensating rollback
//!
//! When an apply halts, every operation that already completed is undone in
//! reverse completion order: creates are deleted, updates reverted to their
//! before-snapshot, deletes recreated, replacements unwound. A failed
//! replacement that got partway through is compensated first. Each
//! compensation gets one bounded retry; whatever still fails ends up in the
//! report rather than being retried forever.

use crate::report::RollbackFailure;
use std::future::Future;
use stratus_provider::{ProviderError, ResourceProvider, RetryConfig};
use stratus_state::{StateRecord, StateStore};
use tracing::{debug, warn};

/// An operation the apply pass finished, with enough context to undo it.
#[derive(Debug)]
pub(crate) enum CompletedOp {
    Created {
        resource_id: String,
        resource_type: String,
        physical_id: String,
    },
    Updated {
        resource_id: String,
        resource_type: String,
        physical_id: String,
        before: StateRecord,
    },
    Deleted {
        resource_id: String,
        before: StateRecord,
    },
    Replaced {
        resource_id: String,
        resource_type: String,
        new_physical_id: String,
        before: StateRecord,
    },
}

impl CompletedOp {
    pub(crate) fn resource_id(&self) -> &str {
        match self {
            CompletedOp::Created { resource_id, .. }
            | CompletedOp::Updated { resource_id, .. }
            | CompletedOp::Deleted { resource_id, .. }
            | CompletedOp::Replaced { resource_id, .. } => resource_id,
        }
    }
}

/// How far a failed replacement got before its error.
#[derive(Debug)]
pub(crate) enum PartialReplace {
    /// Create-then-delete: the successor exists, the old resource was never
    /// deleted and its state record is still accurate
    CreatedNew { new_physical_id: String },
    /// Delete-then-create: the old resource is gone, nothing was created
    DeletedOld,
}

/// A failed entry's partial progress, compensated before the completed ops.
#[derive(Debug)]
pub(crate) struct PartialProgress {
    pub resource_id: String,
    pub resource_type: String,
    pub before: Option<StateRecord>,
    pub partial: PartialReplace,
}

pub(crate) async fn run_rollback(
    provider: &dyn ResourceProvider,
    retry: &RetryConfig,
    partials: Vec<PartialProgress>,
    completed: Vec<CompletedOp>,
    store: &mut StateStore,
) -> (Vec<String>, Vec<RollbackFailure>) {
    let mut rolled_back = Vec::new();
    let mut failures = Vec::new();

    for partial in partials {
        if let Err(failure) = compensate_partial(provider, retry, partial, store).await {
            failures.push(failure);
        }
    }

    for op in completed.into_iter().rev() {
        let resource_id = op.resource_id().to_string();
        match compensate(provider, retry, op, store).await {
            Ok(()) => {
                debug!(resource = %resource_id, "Rolled back");
                rolled_back.push(resource_id);
            }
            Err(failure) => {
                warn!(resource = %failure.resource_id, error = %failure.error, "Rollback failed");
                failures.push(failure);
            }
        }
    }

    (rolled_back, failures)
}

async fn compensate_partial(
    provider: &dyn ResourceProvider,
    retry: &RetryConfig,
    partial: PartialProgress,
    store: &mut StateStore,
) -> Result<(), RollbackFailure> {
    let PartialProgress {
        resource_id,
        resource_type,
        before,
        partial,
    } = partial;

    match partial {
        PartialReplace::CreatedNew { new_physical_id } => {
            debug!(resource = %resource_id, physical = %new_physical_id, "Deleting half-replaced successor");
            retry_once(retry, || provider.delete(&resource_type, &new_physical_id))
                .await
                .map_err(|error| RollbackFailure {
                    resource_id: resource_id.clone(),
                    attempted: format!("delete successor {new_physical_id}"),
                    error: error.to_string(),
                })
            // The old resource was never touched; its record stands
        }
        PartialReplace::DeletedOld => {
            let Some(before) = before else {
                return Err(RollbackFailure {
                    resource_id,
                    attempted: "recreate from snapshot".to_string(),
                    error: "no before-state snapshot recorded".to_string(),
                });
            };
            recreate(provider, retry, &resource_id, &before, store).await
        }
    }
}

async fn compensate(
    provider: &dyn ResourceProvider,
    retry: &RetryConfig,
    op: CompletedOp,
    store: &mut StateStore,
) -> Result<(), RollbackFailure> {
    match op {
        CompletedOp::Created {
            resource_id,
            resource_type,
            physical_id,
        } => {
            retry_once(retry, || provider.delete(&resource_type, &physical_id))
                .await
                .map_err(|error| RollbackFailure {
                    resource_id: resource_id.clone(),
                    attempted: format!("delete {physical_id}"),
                    error: error.to_string(),
                })?;
            record_state(store.remove_record(&resource_id).await, &resource_id)
        }
        CompletedOp::Updated {
            resource_id,
            resource_type,
            physical_id,
            before,
        } => {
            let attributes = retry_once(retry, || {
                provider.update(&resource_type, &physical_id, &before.properties)
            })
            .await
            .map_err(|error| RollbackFailure {
                resource_id: resource_id.clone(),
                attempted: "revert to previous properties".to_string(),
                error: error.to_string(),
            })?;

            let mut reverted = before;
            reverted.attributes = attributes;
            reverted.updated_at = chrono::Utc::now();
            record_state(store.commit_record(&resource_id, reverted).await, &resource_id)
        }
        CompletedOp::Deleted {
            resource_id,
            before,
        } => recreate(provider, retry, &resource_id, &before, store).await,
        CompletedOp::Replaced {
            resource_id,
            resource_type,
            new_physical_id,
            before,
        } => {
            retry_once(retry, || provider.delete(&resource_type, &new_physical_id))
                .await
                .map_err(|error| RollbackFailure {
                    resource_id: resource_id.clone(),
                    attempted: format!("delete successor {new_physical_id}"),
                    error: error.to_string(),
                })?;
            recreate(provider, retry, &resource_id, &before, store).await
        }
    }
}

/// Recreate a resource from its before-snapshot. The provider mints a new
/// physical id, so the committed record differs from the snapshot in id,
/// attributes and timestamps.
async fn recreate(
    provider: &dyn ResourceProvider,
    retry: &RetryConfig,
    resource_id: &str,
    before: &StateRecord,
    store: &mut StateStore,
) -> Result<(), RollbackFailure> {
    let created = retry_once(retry, || {
        provider.create(&before.resource_type, resource_id, &before.properties)
    })
    .await
    .map_err(|error| RollbackFailure {
        resource_id: resource_id.to_string(),
        attempted: "recreate from snapshot".to_string(),
        error: error.to_string(),
    })?;

    let record = StateRecord::new(before.resource_type.clone(), created.physical_id)
        .with_properties(before.properties.clone())
        .with_attributes(created.attributes)
        .with_dependencies(before.dependencies.clone());
    record_state(store.commit_record(resource_id, record).await, resource_id)
}

fn record_state(
    result: stratus_state::Result<()>,
    resource_id: &str,
) -> Result<(), RollbackFailure> {
    result.map_err(|error| RollbackFailure {
        resource_id: resource_id.to_string(),
        attempted: "record state".to_string(),
        error: error.to_string(),
    })
}

/// One retry for transient errors. Rollback never loops: a compensation
/// that keeps failing is reported, not repeated.
async fn retry_once<T, F, Fut>(retry: &RetryConfig, mut call: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    match call().await {
        Err(error) if error.is_transient() => {
            tokio::time::sleep(retry.delay_for_attempt(0)).await;
            call().await
        }
        other => other,
    }
}
