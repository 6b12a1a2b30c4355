//! Intrinsic expressions
//!
//! Property and output values are expressions over parameters, resource
//! attributes and system values, combined with a small set of functions
//! (join, select, split, map lookup). Evaluation happens against an
//! [`EvalContext`]; reference walking drives dependency graph construction.

use crate::model::{BoundParameters, ParamType, Template};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// A property or output value expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Literal string (numbers and booleans are stringified at parse time)
    Literal(String),
    /// Reference to a bound parameter
    ParamRef(String),
    /// Reference to an attribute of another resource
    AttrRef { resource: String, attribute: String },
    /// Reference to a system value (region, account id)
    SysRef(SysVar),
    /// Concatenate string parts with a separator
    Join { separator: String, parts: Vec<Expr> },
    /// Pick one element of a list value
    Select { index: usize, from: Box<Expr> },
    /// Split a string value into a list
    Split { delimiter: String, from: Box<Expr> },
    /// Look up `field` in a mapping table under the row named by `key`
    MapLookup {
        table: String,
        key: Box<Expr>,
        field: String,
    },
}

/// System values injected by the caller, not declared in the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SysVar {
    Region,
    AccountId,
}

impl fmt::Display for SysVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SysVar::Region => write!(f, "region"),
            SysVar::AccountId => write!(f, "account-id"),
        }
    }
}

/// An evaluated expression value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Str(String),
    List(Vec<String>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            Value::List(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{}", s),
            Value::List(items) => write!(f, "{}", items.join(",")),
        }
    }
}

/// Evaluation failure. `UnresolvedReference` is the signal the planner uses
/// to defer a property until its upstream resource exists.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("unresolved reference: {0}")]
    UnresolvedReference(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("select index {index} out of range for list of {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Everything an expression may refer to during evaluation.
pub struct EvalContext<'a> {
    pub template: &'a Template,
    pub parameters: &'a BoundParameters,
    pub region: &'a str,
    pub account_id: &'a str,
    /// Known attributes per logical resource id
    pub attributes: &'a HashMap<String, HashMap<String, String>>,
}

impl Expr {
    /// Evaluate against the given context.
    pub fn eval(&self, ctx: &EvalContext<'_>) -> std::result::Result<Value, EvalError> {
        match self {
            Expr::Literal(s) => Ok(Value::Str(s.clone())),
            Expr::ParamRef(name) => {
                let raw = ctx
                    .parameters
                    .get(name)
                    .ok_or_else(|| EvalError::UnresolvedReference(format!("parameter {name}")))?;
                // List parameters surface as list values
                let is_list = ctx
                    .template
                    .parameter(name)
                    .map(|p| p.param_type == ParamType::StringList)
                    .unwrap_or(false);
                if is_list {
                    Ok(Value::List(
                        raw.split(',').map(|s| s.trim().to_string()).collect(),
                    ))
                } else {
                    Ok(Value::Str(raw.clone()))
                }
            }
            Expr::AttrRef {
                resource,
                attribute,
            } => ctx
                .attributes
                .get(resource)
                .and_then(|attrs| attrs.get(attribute))
                .map(|v| Value::Str(v.clone()))
                .ok_or_else(|| {
                    EvalError::UnresolvedReference(format!("{resource}.{attribute}"))
                }),
            Expr::SysRef(var) => Ok(Value::Str(match var {
                SysVar::Region => ctx.region.to_string(),
                SysVar::AccountId => ctx.account_id.to_string(),
            })),
            Expr::Join { separator, parts } => {
                let mut pieces = Vec::with_capacity(parts.len());
                for part in parts {
                    match part.eval(ctx)? {
                        Value::Str(s) => pieces.push(s),
                        Value::List(_) => {
                            return Err(EvalError::TypeMismatch(
                                "join expects string parts, got a list".to_string(),
                            ));
                        }
                    }
                }
                Ok(Value::Str(pieces.join(separator)))
            }
            Expr::Select { index, from } => match from.eval(ctx)? {
                Value::List(items) => items.get(*index).map(|s| Value::Str(s.clone())).ok_or(
                    EvalError::IndexOutOfRange {
                        index: *index,
                        len: items.len(),
                    },
                ),
                Value::Str(_) => Err(EvalError::TypeMismatch(
                    "select expects a list value".to_string(),
                )),
            },
            Expr::Split { delimiter, from } => match from.eval(ctx)? {
                Value::Str(s) => Ok(Value::List(
                    s.split(delimiter.as_str()).map(|p| p.to_string()).collect(),
                )),
                Value::List(_) => Err(EvalError::TypeMismatch(
                    "split expects a string value".to_string(),
                )),
            },
            Expr::MapLookup { table, key, field } => {
                let key = match key.eval(ctx)? {
                    Value::Str(s) => s,
                    Value::List(_) => {
                        return Err(EvalError::TypeMismatch(
                            "map lookup key must be a string".to_string(),
                        ));
                    }
                };
                let mapping = ctx.template.mappings.get(table).ok_or_else(|| {
                    EvalError::UnresolvedReference(format!("mapping {table}"))
                })?;
                mapping
                    .lookup(&key, field)
                    .map(|v| Value::Str(v.to_string()))
                    .ok_or_else(|| {
                        EvalError::UnresolvedReference(format!("mapping {table}[{key}][{field}]"))
                    })
            }
        }
    }

    /// Resource attribute references reachable from this expression,
    /// as (resource id, attribute name) pairs.
    pub fn references(&self) -> Vec<(&str, &str)> {
        let mut out = Vec::new();
        self.walk(&mut |e| {
            if let Expr::AttrRef {
                resource,
                attribute,
            } = e
            {
                out.push((resource.as_str(), attribute.as_str()));
            }
        });
        out
    }

    /// Parameter names reachable from this expression.
    pub fn parameters(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.walk(&mut |e| {
            if let Expr::ParamRef(name) = e {
                out.push(name.as_str());
            }
        });
        out
    }

    fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Join { parts, .. } => {
                for part in parts {
                    part.walk(f);
                }
            }
            Expr::Select { from, .. } | Expr::Split { from, .. } => from.walk(f),
            Expr::MapLookup { key, .. } => key.walk(f),
            Expr::Literal(_) | Expr::ParamRef(_) | Expr::AttrRef { .. } | Expr::SysRef(_) => {}
        }
    }
}
