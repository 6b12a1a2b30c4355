//! リソースノードのパース

use super::expr::parse_property_expr;
use crate::error::{Result, TemplateError};
use crate::model::ResourceDecl;
use kdl::KdlNode;

/// resource ノードをパース
///
/// 子ノードは depends-on を除きすべてプロパティとして扱う
pub(super) fn parse_resource(node: &KdlNode) -> Result<ResourceDecl> {
    let id = node
        .entries()
        .first()
        .and_then(|e| e.value().as_string())
        .ok_or_else(|| TemplateError::Invalid("resource requires an id".to_string()))?
        .to_string();

    let resource_type = node
        .get("type")
        .and_then(|v| v.as_string())
        .ok_or_else(|| TemplateError::Invalid(format!("resource '{id}' requires type=")))?
        .to_string();

    let mut properties = Vec::new();
    let mut depends_on = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "depends-on" => {
                    depends_on = child
                        .entries()
                        .iter()
                        .filter_map(|e| e.value().as_string().map(|s| s.to_string()))
                        .collect();
                }
                property => {
                    if properties.iter().any(|(n, _)| n == property) {
                        return Err(TemplateError::Invalid(format!(
                            "resource '{id}' has duplicate property '{property}'"
                        )));
                    }
                    let expr = parse_property_expr(child)?;
                    properties.push((property.to_string(), expr));
                }
            }
        }
    }

    Ok(ResourceDecl {
        id,
        resource_type,
        properties,
        depends_on,
    })
}
