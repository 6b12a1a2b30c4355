//! Replacement policy
//!
//! Declares which properties of each resource type can change in place and
//! which force a replacement, plus the property carrying the type's unique
//! name (used to pick the replacement ordering).

use std::collections::HashMap;

/// Mutability rules for one resource type.
#[derive(Debug, Clone, Default)]
pub struct TypePolicy {
    /// Properties that cannot change in place
    pub immutable: Vec<String>,
    /// Property enforced unique per type by providers, if any
    pub naming_property: Option<String>,
}

impl TypePolicy {
    pub fn new(immutable: &[&str], naming_property: Option<&str>) -> Self {
        Self {
            immutable: immutable.iter().map(|s| s.to_string()).collect(),
            naming_property: naming_property.map(|s| s.to_string()),
        }
    }
}

/// Per-type replacement rules. Types without an entry are treated as fully
/// mutable: every change is an in-place update.
#[derive(Debug, Clone)]
pub struct ReplacementPolicy {
    types: HashMap<String, TypePolicy>,
}

impl Default for ReplacementPolicy {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ReplacementPolicy {
    /// Rules for the built-in resource types.
    pub fn builtin() -> Self {
        let mut types = HashMap::new();
        types.insert(
            "network".to_string(),
            TypePolicy::new(&["cidr"], Some("name")),
        );
        types.insert(
            "subnet".to_string(),
            TypePolicy::new(&["network", "cidr", "zone"], Some("name")),
        );
        types.insert(
            "route-table".to_string(),
            TypePolicy::new(&["network"], Some("name")),
        );
        types.insert(
            "security-group".to_string(),
            TypePolicy::new(&["network"], Some("name")),
        );
        types.insert(
            "compute-instance".to_string(),
            TypePolicy::new(&["image", "subnet"], Some("name")),
        );
        types.insert(
            "endpoint".to_string(),
            TypePolicy::new(&["network", "service"], Some("name")),
        );
        types.insert(
            "dns-zone".to_string(),
            TypePolicy::new(&["name"], Some("name")),
        );
        types.insert(
            "dns-record".to_string(),
            TypePolicy::new(&["zone", "name", "record-type"], Some("name")),
        );
        Self { types }
    }

    /// Empty policy: everything updates in place.
    pub fn permissive() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    /// Replace or add the rules for one type.
    pub fn set_type(&mut self, resource_type: impl Into<String>, policy: TypePolicy) {
        self.types.insert(resource_type.into(), policy);
    }

    pub fn is_immutable(&self, resource_type: &str, property: &str) -> bool {
        self.types
            .get(resource_type)
            .map(|p| p.immutable.iter().any(|i| i == property))
            .unwrap_or(false)
    }

    pub fn naming_property(&self, resource_type: &str) -> Option<&str> {
        self.types
            .get(resource_type)
            .and_then(|p| p.naming_property.as_deref())
    }
}
