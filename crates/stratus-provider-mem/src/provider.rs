//! In-memory resource provider
//!
//! Holds every "live" resource in a process-local table. Physical ids are
//! minted sequentially per type, output attributes mimic what a real cloud
//! would report, and name collisions within a type are rejected. Used by the
//! CLI's `--provider memory` mode and throughout the engine tests.

use crate::faults::{FaultPlan, Op};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use stratus_provider::{
    Attributes, Created, ProviderError, ResolvedProperties, ResourceProvider, Result,
};
use stratus_template::Value;
use tracing::debug;

/// One live resource held by the provider.
#[derive(Debug, Clone)]
pub struct ResourceRecord {
    pub physical_id: String,
    pub resource_type: String,
    /// Logical id passed at create time, kept for fault targeting
    pub logical_id: String,
    pub properties: ResolvedProperties,
    pub attributes: Attributes,
}

#[derive(Debug, Default)]
struct Inner {
    counter: u64,
    records: BTreeMap<String, ResourceRecord>,
    faults: FaultPlan,
}

/// In-memory provider. Cheap to clone state out of, safe to share across
/// tasks; all mutation happens under one short-lived lock.
#[derive(Debug, Default)]
pub struct MemProvider {
    inner: Mutex<Inner>,
}

impl MemProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every future call of `op` on `resource_id` with `error`.
    pub fn fail_permanently(&self, op: Op, resource_id: &str, error: ProviderError) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.faults.inject_permanent(op, resource_id, error);
    }

    /// Fail the next `times` calls of `op` on `resource_id` with a
    /// transient `Unavailable` error, then succeed.
    pub fn fail_transiently(&self, op: Op, resource_id: &str, times: u32) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.faults.inject_transient(op, resource_id, times);
    }

    /// Snapshot of all live records, ordered by physical id.
    pub fn records(&self) -> Vec<ResourceRecord> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.records.values().cloned().collect()
    }

    /// Look up one live record.
    pub fn record(&self, physical_id: &str) -> Option<ResourceRecord> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.records.get(physical_id).cloned()
    }

    /// Find a live record by type and `name` property.
    pub fn find_by_name(&self, resource_type: &str, name: &str) -> Option<ResourceRecord> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .records
            .values()
            .find(|r| r.resource_type == resource_type && property_str(&r.properties, "name") == Some(name))
            .cloned()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Physical id prefix per resource type.
fn id_prefix(resource_type: &str) -> Result<&'static str> {
    match resource_type {
        "network" => Ok("vpc"),
        "subnet" => Ok("sub"),
        "route-table" => Ok("rt"),
        "security-group" => Ok("sg"),
        "compute-instance" => Ok("srv"),
        "endpoint" => Ok("ep"),
        "dns-zone" => Ok("zone"),
        "dns-record" => Ok("rec"),
        other => Err(ProviderError::UnsupportedType(other.to_string())),
    }
}

fn property_str<'a>(properties: &'a ResolvedProperties, key: &str) -> Option<&'a str> {
    properties.get(key).and_then(|v| v.as_str())
}

/// Compute the output attributes a live resource reports.
fn compute_attributes(
    resource_type: &str,
    physical_id: &str,
    seq: u64,
    properties: &ResolvedProperties,
    records: &BTreeMap<String, ResourceRecord>,
) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert("id".to_string(), physical_id.to_string());

    match resource_type {
        "network" => {
            if let Some(cidr) = property_str(properties, "cidr") {
                attrs.insert("cidr".to_string(), cidr.to_string());
            }
        }
        "subnet" => {
            if let Some(zone) = property_str(properties, "zone") {
                attrs.insert("zone".to_string(), zone.to_string());
            }
        }
        "compute-instance" => {
            attrs.insert(
                "private-ip".to_string(),
                format!("10.0.{}.{}", (seq >> 8) & 0xff, seq & 0xff),
            );
        }
        "endpoint" => {
            // Composite attribute, split apart with split/select in templates
            attrs.insert(
                "dns-entry".to_string(),
                format!("Z{seq:06}:{physical_id}.endpoint.internal"),
            );
        }
        "dns-zone" => {
            if let Some(name) = property_str(properties, "name") {
                attrs.insert("name".to_string(), name.to_string());
            }
        }
        "dns-record" => {
            let name = property_str(properties, "name").unwrap_or(physical_id);
            // Resolve the owning zone's name when the zone lives here too
            let zone_name = property_str(properties, "zone")
                .map(|zone_id| {
                    records
                        .get(zone_id)
                        .and_then(|r| r.attributes.get("name").cloned())
                        .unwrap_or_else(|| zone_id.to_string())
                })
                .unwrap_or_else(|| "internal".to_string());
            attrs.insert("fqdn".to_string(), format!("{name}.{zone_name}"));
        }
        _ => {}
    }

    attrs
}

impl Inner {
    /// Reject a second resource of the same type with the same name.
    fn check_name_collision(
        &self,
        resource_type: &str,
        properties: &ResolvedProperties,
        exclude_physical_id: Option<&str>,
    ) -> Result<()> {
        let Some(name) = property_str(properties, "name") else {
            return Ok(());
        };
        let taken = self.records.values().any(|r| {
            r.resource_type == resource_type
                && property_str(&r.properties, "name") == Some(name)
                && Some(r.physical_id.as_str()) != exclude_physical_id
        });
        if taken {
            return Err(ProviderError::Conflict(format!(
                "{resource_type} named '{name}' already exists"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceProvider for MemProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create(
        &self,
        resource_type: &str,
        resource_id: &str,
        properties: &ResolvedProperties,
    ) -> Result<Created> {
        let prefix = id_prefix(resource_type)?;
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        inner.faults.check(Op::Create, resource_id)?;
        inner.check_name_collision(resource_type, properties, None)?;

        inner.counter += 1;
        let seq = inner.counter;
        let physical_id = format!("{prefix}-{seq:06}");
        let attributes =
            compute_attributes(resource_type, &physical_id, seq, properties, &inner.records);

        debug!(
            resource_type = %resource_type,
            resource_id = %resource_id,
            physical_id = %physical_id,
            "Created resource"
        );

        inner.records.insert(
            physical_id.clone(),
            ResourceRecord {
                physical_id: physical_id.clone(),
                resource_type: resource_type.to_string(),
                logical_id: resource_id.to_string(),
                properties: properties.clone(),
                attributes: attributes.clone(),
            },
        );

        Ok(Created {
            physical_id,
            attributes,
        })
    }

    async fn update(
        &self,
        resource_type: &str,
        physical_id: &str,
        properties: &ResolvedProperties,
    ) -> Result<Attributes> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let logical_id = inner
            .records
            .get(physical_id)
            .map(|r| r.logical_id.clone())
            .unwrap_or_else(|| physical_id.to_string());
        inner.faults.check(Op::Update, &logical_id)?;

        if !inner.records.contains_key(physical_id) {
            return Err(ProviderError::NotFound(physical_id.to_string()));
        }
        inner.check_name_collision(resource_type, properties, Some(physical_id))?;

        let seq = physical_id
            .rsplit('-')
            .next()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        let attributes =
            compute_attributes(resource_type, physical_id, seq, properties, &inner.records);

        debug!(physical_id = %physical_id, "Updated resource");

        if let Some(record) = inner.records.get_mut(physical_id) {
            record.properties = properties.clone();
            record.attributes = attributes.clone();
        }

        Ok(attributes)
    }

    async fn delete(&self, resource_type: &str, physical_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let logical_id = inner
            .records
            .get(physical_id)
            .map(|r| r.logical_id.clone())
            .unwrap_or_else(|| physical_id.to_string());
        inner.faults.check(Op::Delete, &logical_id)?;

        // Idempotent: deleting an absent resource succeeds
        if inner.records.remove(physical_id).is_none() {
            debug!(resource_type = %resource_type, physical_id = %physical_id, "Delete of absent resource");
        } else {
            debug!(physical_id = %physical_id, "Deleted resource");
        }
        Ok(())
    }

    async fn describe(&self, resource_type: &str, physical_id: &str) -> Result<Attributes> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let logical_id = inner
            .records
            .get(physical_id)
            .map(|r| r.logical_id.clone())
            .unwrap_or_else(|| physical_id.to_string());
        inner.faults.check(Op::Describe, &logical_id)?;

        inner
            .records
            .get(physical_id)
            .map(|r| r.attributes.clone())
            .ok_or_else(|| ProviderError::NotFound(format!("{resource_type} {physical_id}")))
    }
}

/// Convenience for building property maps in tests and the CLI.
pub fn props(pairs: &[(&str, &str)]) -> ResolvedProperties {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::Str(v.to_string())))
        .collect()
}
