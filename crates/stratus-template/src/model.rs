//! Stack template model
//!
//! A template declares the desired shape of one stack: its parameters,
//! lookup tables, typed resources and outputs. Parsing produces this model;
//! the engine turns it into a dependency graph and a change set.

use crate::error::{Result, TemplateError};
use crate::expr::Expr;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A parsed stack template.
///
/// Declaration order of `parameters` and `resources` is preserved; the
/// engine uses it to break ties when ordering independent resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Template {
    /// Stack name
    pub name: String,
    /// Declared input parameters
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    /// Named two-level lookup tables (e.g. region -> image id)
    #[serde(default)]
    pub mappings: HashMap<String, Mapping>,
    /// Declared resources, in declaration order
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
    /// Declared stack outputs
    #[serde(default)]
    pub outputs: Vec<OutputDecl>,
}

impl Template {
    pub fn resource(&self, id: &str) -> Option<&ResourceDecl> {
        self.resources.iter().find(|r| r.id == id)
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Declared input parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub param_type: ParamType,
    /// Value used when no override is supplied
    pub default: Option<String>,
    /// Allowed values; empty means unrestricted
    #[serde(default)]
    pub allowed: Vec<String>,
}

/// Declared parameter type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Number,
    /// Comma-separated list; a reference to it evaluates to a list value
    StringList,
}

/// Named lookup table: key -> field -> value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mapping {
    pub rows: HashMap<String, HashMap<String, String>>,
}

impl Mapping {
    pub fn lookup(&self, key: &str, field: &str) -> Option<&str> {
        self.rows.get(key).and_then(|row| row.get(field)).map(|s| s.as_str())
    }
}

/// A declared resource: a type tag plus property expressions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDecl {
    /// Logical id, unique within the template
    pub id: String,
    /// Resource type tag (e.g. "network", "subnet", "compute-instance")
    pub resource_type: String,
    /// Property expressions, in declaration order
    pub properties: Vec<(String, Expr)>,
    /// Explicit dependencies in addition to those inferred from expressions
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl ResourceDecl {
    pub fn property(&self, name: &str) -> Option<&Expr> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e)
    }
}

/// A declared stack output, resolved after a successful apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDecl {
    pub name: String,
    pub description: Option<String>,
    pub value: Expr,
}

/// Parameter values bound for one plan/apply pass.
pub type BoundParameters = HashMap<String, String>;

/// Bind parameter values from overrides and declared defaults.
///
/// Every declared parameter must end up with a value; overrides must name
/// declared parameters; bound values must satisfy the declared type and the
/// allowed set. List parameters are validated element-wise.
pub fn bind_parameters(
    template: &Template,
    overrides: &HashMap<String, String>,
) -> Result<BoundParameters> {
    for name in overrides.keys() {
        if template.parameter(name).is_none() {
            return Err(TemplateError::UnknownParameter(name.clone()));
        }
    }

    let mut bound = BoundParameters::new();
    for param in &template.parameters {
        let value = overrides
            .get(&param.name)
            .cloned()
            .or_else(|| param.default.clone())
            .ok_or_else(|| TemplateError::MissingParameter(param.name.clone()))?;

        validate_parameter_value(param, &value)?;
        bound.insert(param.name.clone(), value);
    }

    Ok(bound)
}

fn validate_parameter_value(param: &Parameter, value: &str) -> Result<()> {
    if param.param_type == ParamType::Number && value.trim().parse::<f64>().is_err() {
        return Err(TemplateError::NotANumber {
            name: param.name.clone(),
            value: value.to_string(),
        });
    }

    if param.allowed.is_empty() {
        return Ok(());
    }

    // List values are checked element by element
    let elements: Vec<&str> = match param.param_type {
        ParamType::StringList => value.split(',').map(|s| s.trim()).collect(),
        _ => vec![value],
    };

    for element in elements {
        if !param.allowed.iter().any(|a| a == element) {
            return Err(TemplateError::DisallowedValue {
                name: param.name.clone(),
                value: element.to_string(),
                allowed: param.allowed.join(", "),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template_with(params: Vec<Parameter>) -> Template {
        Template {
            name: "test".to_string(),
            parameters: params,
            ..Default::default()
        }
    }

    #[test]
    fn test_bind_uses_default() {
        let template = template_with(vec![Parameter {
            name: "cidr".to_string(),
            param_type: ParamType::String,
            default: Some("10.0.0.0/16".to_string()),
            allowed: vec![],
        }]);

        let bound = bind_parameters(&template, &HashMap::new()).unwrap();
        assert_eq!(bound.get("cidr").unwrap(), "10.0.0.0/16");
    }

    #[test]
    fn test_bind_override_wins() {
        let template = template_with(vec![Parameter {
            name: "cidr".to_string(),
            param_type: ParamType::String,
            default: Some("10.0.0.0/16".to_string()),
            allowed: vec![],
        }]);

        let mut overrides = HashMap::new();
        overrides.insert("cidr".to_string(), "172.16.0.0/12".to_string());

        let bound = bind_parameters(&template, &overrides).unwrap();
        assert_eq!(bound.get("cidr").unwrap(), "172.16.0.0/12");
    }

    #[test]
    fn test_bind_missing_value() {
        let template = template_with(vec![Parameter {
            name: "zone".to_string(),
            param_type: ParamType::String,
            default: None,
            allowed: vec![],
        }]);

        let err = bind_parameters(&template, &HashMap::new()).unwrap_err();
        assert!(matches!(err, TemplateError::MissingParameter(name) if name == "zone"));
    }

    #[test]
    fn test_bind_unknown_override() {
        let template = template_with(vec![]);

        let mut overrides = HashMap::new();
        overrides.insert("nope".to_string(), "x".to_string());

        let err = bind_parameters(&template, &overrides).unwrap_err();
        assert!(matches!(err, TemplateError::UnknownParameter(name) if name == "nope"));
    }

    #[test]
    fn test_bind_allowed_set() {
        let template = template_with(vec![Parameter {
            name: "size".to_string(),
            param_type: ParamType::String,
            default: Some("small".to_string()),
            allowed: vec!["small".to_string(), "medium".to_string()],
        }]);

        let mut overrides = HashMap::new();
        overrides.insert("size".to_string(), "huge".to_string());

        let err = bind_parameters(&template, &overrides).unwrap_err();
        assert!(matches!(err, TemplateError::DisallowedValue { .. }));
    }

    #[test]
    fn test_bind_number_validation() {
        let template = template_with(vec![Parameter {
            name: "count".to_string(),
            param_type: ParamType::Number,
            default: None,
            allowed: vec![],
        }]);

        let mut overrides = HashMap::new();
        overrides.insert("count".to_string(), "three".to_string());
        let err = bind_parameters(&template, &overrides).unwrap_err();
        assert!(matches!(err, TemplateError::NotANumber { .. }));

        overrides.insert("count".to_string(), "3".to_string());
        let bound = bind_parameters(&template, &overrides).unwrap();
        assert_eq!(bound.get("count").unwrap(), "3");
    }

    #[test]
    fn test_bind_list_allowed_elementwise() {
        let template = template_with(vec![Parameter {
            name: "zones".to_string(),
            param_type: ParamType::StringList,
            default: None,
            allowed: vec!["a".to_string(), "b".to_string()],
        }]);

        let mut overrides = HashMap::new();
        overrides.insert("zones".to_string(), "a,b".to_string());
        assert!(bind_parameters(&template, &overrides).is_ok());

        overrides.insert("zones".to_string(), "a,c".to_string());
        let err = bind_parameters(&template, &overrides).unwrap_err();
        assert!(matches!(err, TemplateError::DisallowedValue { value, .. } if value == "c"));
    }
}
