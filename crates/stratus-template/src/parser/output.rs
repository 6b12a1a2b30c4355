//! アウトプットノードのパース

use super::expr::{parse_entry_expr, parse_expr_node};
use crate::error::{Result, TemplateError};
use crate::model::OutputDecl;
use kdl::KdlNode;

/// output ノードをパース
///
/// 値は2番目の位置引数、または単一のchildノード:
/// - output "name" (attr)"vpc.id"
/// - output "name" description="..." { select index=0 { ... } }
pub(super) fn parse_output(node: &KdlNode) -> Result<OutputDecl> {
    let positional: Vec<_> = node
        .entries()
        .iter()
        .filter(|e| e.name().is_none())
        .collect();

    let name = positional
        .first()
        .and_then(|e| e.value().as_string())
        .ok_or_else(|| TemplateError::Invalid("output requires a name".to_string()))?
        .to_string();

    let description = node
        .get("description")
        .and_then(|v| v.as_string())
        .map(|s| s.to_string());

    let value = if let Some(entry) = positional.get(1) {
        parse_entry_expr(entry)?
    } else if let Some(children) = node.children() {
        let nodes = children.nodes();
        if nodes.len() != 1 {
            return Err(TemplateError::Invalid(format!(
                "output '{name}' expects exactly one expression node, got {}",
                nodes.len()
            )));
        }
        parse_expr_node(&nodes[0])?
    } else {
        return Err(TemplateError::Invalid(format!(
            "output '{name}' has no value"
        )));
    };

    Ok(OutputDecl {
        name,
        description,
        value,
    })
}
