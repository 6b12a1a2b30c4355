//! 式のパース
//!
//! プロパティ値は注釈付きスカラーまたは関数ノードで表現されます。
//! 注釈: (param)"name" / (attr)"resource.attribute" / (sys)"region"
//! 関数ノード: value / join / select / split / map

use crate::error::{Result, TemplateError};
use crate::expr::{Expr, SysVar};
use kdl::{KdlEntry, KdlNode, KdlValue};

/// プロパティノードから式を取り出す
///
/// childがあれば関数式、なければ最初の位置引数をスカラー式として扱う
pub(super) fn parse_property_expr(node: &KdlNode) -> Result<Expr> {
    if let Some(children) = node.children() {
        let nodes = children.nodes();
        if nodes.len() != 1 {
            return Err(TemplateError::Invalid(format!(
                "property '{}' expects exactly one expression node, got {}",
                node.name().value(),
                nodes.len()
            )));
        }
        return parse_expr_node(&nodes[0]);
    }

    let entry = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .ok_or_else(|| {
            TemplateError::Invalid(format!("property '{}' has no value", node.name().value()))
        })?;
    parse_entry_expr(entry)
}

/// 注釈付きスカラーを式に変換
pub(super) fn parse_entry_expr(entry: &KdlEntry) -> Result<Expr> {
    if let Some(annotation) = entry.ty() {
        let text = entry.value().as_string().ok_or_else(|| {
            TemplateError::Invalid(format!(
                "({}) annotation requires a string value",
                annotation.value()
            ))
        })?;
        return match annotation.value() {
            "param" => Ok(Expr::ParamRef(text.to_string())),
            "attr" => {
                let (resource, attribute) = text.split_once('.').ok_or_else(|| {
                    TemplateError::Invalid(format!(
                        "(attr) reference must be \"resource.attribute\", got \"{text}\""
                    ))
                })?;
                Ok(Expr::AttrRef {
                    resource: resource.to_string(),
                    attribute: attribute.to_string(),
                })
            }
            "sys" => match text {
                "region" => Ok(Expr::SysRef(SysVar::Region)),
                "account-id" => Ok(Expr::SysRef(SysVar::AccountId)),
                other => Err(TemplateError::Invalid(format!(
                    "unknown system value: {other}"
                ))),
            },
            other => Err(TemplateError::Invalid(format!(
                "unknown annotation: ({other})"
            ))),
        };
    }

    Ok(Expr::Literal(literal_text(entry.value())))
}

/// 関数ノードをパース
pub(super) fn parse_expr_node(node: &KdlNode) -> Result<Expr> {
    match node.name().value() {
        "value" => {
            let entry = node
                .entries()
                .iter()
                .find(|e| e.name().is_none())
                .ok_or_else(|| {
                    TemplateError::Invalid("value node has no argument".to_string())
                })?;
            parse_entry_expr(entry)
        }
        "join" => {
            let separator = node
                .get("sep")
                .and_then(|v| v.as_string())
                .unwrap_or("")
                .to_string();
            let parts = operand_exprs(node)?;
            if parts.is_empty() {
                return Err(TemplateError::Invalid(
                    "join requires at least one part".to_string(),
                ));
            }
            Ok(Expr::Join { separator, parts })
        }
        "select" => {
            let index = node
                .get("index")
                .and_then(|v| v.as_integer())
                .ok_or_else(|| TemplateError::Invalid("select requires index=".to_string()))?;
            if index < 0 {
                return Err(TemplateError::Invalid(format!(
                    "select index must be non-negative, got {index}"
                )));
            }
            Ok(Expr::Select {
                index: index as usize,
                from: Box::new(single_operand(node)?),
            })
        }
        "split" => {
            let delimiter = node
                .get("on")
                .and_then(|v| v.as_string())
                .ok_or_else(|| TemplateError::Invalid("split requires on=".to_string()))?
                .to_string();
            Ok(Expr::Split {
                delimiter,
                from: Box::new(single_operand(node)?),
            })
        }
        "map" => {
            let table = node
                .get("table")
                .and_then(|v| v.as_string())
                .ok_or_else(|| TemplateError::Invalid("map requires table=".to_string()))?
                .to_string();
            let field = node
                .get("field")
                .and_then(|v| v.as_string())
                .ok_or_else(|| TemplateError::Invalid("map requires field=".to_string()))?
                .to_string();
            Ok(Expr::MapLookup {
                table,
                key: Box::new(single_operand(node)?),
                field,
            })
        }
        other => Err(TemplateError::Invalid(format!(
            "unknown expression node: {other}"
        ))),
    }
}

/// 位置引数とchildノードの両方をオペランドとして集める
fn operand_exprs(node: &KdlNode) -> Result<Vec<Expr>> {
    let mut operands = Vec::new();
    for entry in node.entries().iter().filter(|e| e.name().is_none()) {
        operands.push(parse_entry_expr(entry)?);
    }
    if let Some(children) = node.children() {
        for child in children.nodes() {
            operands.push(parse_expr_node(child)?);
        }
    }
    Ok(operands)
}

fn single_operand(node: &KdlNode) -> Result<Expr> {
    let operands = operand_exprs(node)?;
    let mut it = operands.into_iter();
    match (it.next(), it.next()) {
        (Some(expr), None) => Ok(expr),
        (first, _) => Err(TemplateError::Invalid(format!(
            "{} expects exactly one operand{}",
            node.name().value(),
            if first.is_none() { ", got none" } else { "" }
        ))),
    }
}

/// スカラー値を文字列化（整数・真偽値・実数も文字列として扱う）
pub(super) fn literal_text(value: &KdlValue) -> String {
    if let Some(s) = value.as_string() {
        s.to_string()
    } else if let Some(i) = value.as_integer() {
        i.to_string()
    } else if let Some(b) = value.as_bool() {
        b.to_string()
    } else if let Some(f) = value.as_float() {
        f.to_string()
    } else {
        String::new()
    }
}
