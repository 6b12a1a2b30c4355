//! マッピングノードのパース

use super::expr::literal_text;
use crate::error::{Result, TemplateError};
use crate::model::Mapping;
use kdl::KdlNode;
use std::collections::HashMap;

/// mapping ノードをパース
///
/// entry子ノードの位置引数がキー、名前付き引数がフィールドになる:
/// mapping "images" { entry "tokyo" image="img-123" }
pub(super) fn parse_mapping(node: &KdlNode) -> Result<(String, Mapping)> {
    let name = node
        .entries()
        .first()
        .and_then(|e| e.value().as_string())
        .ok_or_else(|| TemplateError::Invalid("mapping requires a name".to_string()))?
        .to_string();

    let mut rows = HashMap::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() != "entry" {
                continue;
            }
            let key = child
                .entries()
                .first()
                .and_then(|e| e.value().as_string())
                .ok_or_else(|| {
                    TemplateError::Invalid(format!("mapping '{name}' entry requires a key"))
                })?
                .to_string();

            let mut fields = HashMap::new();
            for entry in child.entries().iter() {
                if let Some(field) = entry.name() {
                    fields.insert(field.value().to_string(), literal_text(entry.value()));
                }
            }

            if rows.insert(key.clone(), fields).is_some() {
                return Err(TemplateError::Invalid(format!(
                    "mapping '{name}' has duplicate key '{key}'"
                )));
            }
        }
    }

    Ok((name, Mapping { rows }))
}
