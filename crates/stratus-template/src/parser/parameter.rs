//! パラメータノードのパース

use super::expr::literal_text;
use crate::error::{Result, TemplateError};
use crate::model::{ParamType, Parameter};
use kdl::KdlNode;

/// parameter ノードをパース
///
/// サポートされる形式:
/// - parameter "name" type="string" default="value"
/// - parameter "name" { allowed "a" "b" }
pub(super) fn parse_parameter(node: &KdlNode) -> Result<Parameter> {
    let name = node
        .entries()
        .first()
        .and_then(|e| e.value().as_string())
        .ok_or_else(|| TemplateError::Invalid("parameter requires a name".to_string()))?
        .to_string();

    let param_type = match node.get("type").and_then(|v| v.as_string()) {
        None | Some("string") => ParamType::String,
        Some("number") => ParamType::Number,
        Some("list") => ParamType::StringList,
        Some(other) => {
            return Err(TemplateError::Invalid(format!(
                "parameter '{name}' has unknown type \"{other}\""
            )));
        }
    };

    let default = node.get("default").map(literal_text);

    let mut allowed = Vec::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() == "allowed" {
                allowed = child
                    .entries()
                    .iter()
                    .filter_map(|e| e.value().as_string().map(|s| s.to_string()))
                    .collect();
            }
        }
    }

    Ok(Parameter {
        name,
        param_type,
        default,
        allowed,
    })
}
