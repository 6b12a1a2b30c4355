//! Resource provider trait definition

use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use stratus_template::Value;

/// Fully resolved property values for one resource, as handed to a provider.
pub type ResolvedProperties = BTreeMap<String, Value>;

/// Provider-reported output attributes of a live resource.
pub type Attributes = BTreeMap<String, String>;

/// Result of creating a resource: the minted physical id plus its
/// output attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub physical_id: String,
    pub attributes: Attributes,
}

/// Resource provider abstraction
///
/// A provider knows how to create, mutate, delete and describe resources of
/// the types it supports. It is deliberately ignorant of dependency order,
/// retries and state bookkeeping; the engine owns all of that.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Provider name (e.g. "memory")
    fn name(&self) -> &str;

    /// Create a resource. `resource_id` is the logical id, for diagnostics;
    /// the provider mints and returns the physical id.
    async fn create(
        &self,
        resource_type: &str,
        resource_id: &str,
        properties: &ResolvedProperties,
    ) -> Result<Created>;

    /// Update a live resource in place and return its refreshed attributes.
    async fn update(
        &self,
        resource_type: &str,
        physical_id: &str,
        properties: &ResolvedProperties,
    ) -> Result<Attributes>;

    /// Delete a live resource. Deleting an id that no longer exists counts
    /// as success, so repeated destroys converge.
    async fn delete(&self, resource_type: &str, physical_id: &str) -> Result<()>;

    /// Read back the current attributes of a live resource.
    async fn describe(&self, resource_type: &str, physical_id: &str) -> Result<Attributes>;
}
