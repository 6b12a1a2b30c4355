//! Stack state data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use stratus_template::Value;

pub const STATE_VERSION: u32 = 1;

/// Persisted record of one live resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateRecord {
    /// Resource type tag
    pub resource_type: String,

    /// Provider-assigned physical id
    pub physical_id: String,

    /// Property values as last successfully applied
    pub properties: BTreeMap<String, Value>,

    /// Provider-reported output attributes
    pub attributes: BTreeMap<String, String>,

    /// Logical ids this resource depended on when applied. Kept so deletes
    /// can be ordered even after the resource left the template.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// When the resource was created
    pub created_at: DateTime<Utc>,

    /// Last successful apply
    pub updated_at: DateTime<Utc>,
}

impl StateRecord {
    pub fn new(resource_type: impl Into<String>, physical_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            resource_type: resource_type.into(),
            physical_id: physical_id.into(),
            properties: BTreeMap::new(),
            attributes: BTreeMap::new(),
            dependencies: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_properties(mut self, properties: BTreeMap<String, Value>) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// The whole persisted stack state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackState {
    /// State file version
    pub version: u32,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Records indexed by logical resource id
    pub records: BTreeMap<String, StateRecord>,

    /// Stack outputs as of the last fully successful apply
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
}

impl Default for StackState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            records: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }
}

impl StackState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, logical_id: &str) -> Option<&StateRecord> {
        self.records.get(logical_id)
    }

    pub fn set_record(&mut self, logical_id: String, record: StateRecord) {
        self.records.insert(logical_id, record);
        self.updated_at = Utc::now();
    }

    pub fn remove_record(&mut self, logical_id: &str) -> Option<StateRecord> {
        let removed = self.records.remove(logical_id);
        if removed.is_some() {
            self.updated_at = Utc::now();
        }
        removed
    }

    /// Attribute maps per logical id, in the shape expression evaluation wants.
    pub fn attribute_context(
        &self,
    ) -> std::collections::HashMap<String, std::collections::HashMap<String, String>> {
        self.records
            .iter()
            .map(|(id, record)| {
                (
                    id.clone(),
                    record.attributes.clone().into_iter().collect(),
                )
            })
            .collect()
    }
}
