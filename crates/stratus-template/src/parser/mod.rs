//! KDLパーサー
//!
//! StratusのKDLテンプレートをパースします。
//! 各ノードタイプのパース処理はモジュールに分離されています。

mod expr;
mod mapping;
mod output;
mod parameter;
mod resource;

use mapping::parse_mapping;
use output::parse_output;
use parameter::parse_parameter;
use resource::parse_resource;

use crate::error::{Result, TemplateError};
use crate::model::Template;
use kdl::KdlDocument;
use std::fs;
use std::path::Path;

/// KDLファイルをパースしてTemplateを生成
pub fn parse_template_file<P: AsRef<Path>>(path: P) -> Result<Template> {
    let content = fs::read_to_string(path.as_ref())?;
    let name = path
        .as_ref()
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();
    parse_template_str(&content, name)
}

/// KDL文字列をパース
pub fn parse_template_str(content: &str, default_name: String) -> Result<Template> {
    let doc: KdlDocument = content.parse()?;

    let mut template = Template {
        name: default_name,
        ..Default::default()
    };

    for node in doc.nodes() {
        match node.name().value() {
            "stack" => {
                // stackノードから名前を取得
                if let Some(stack_name) =
                    node.entries().first().and_then(|e| e.value().as_string())
                {
                    template.name = stack_name.to_string();
                }
            }
            "parameter" => {
                let parameter = parse_parameter(node)?;
                if template.parameter(&parameter.name).is_some() {
                    return Err(TemplateError::Invalid(format!(
                        "duplicate parameter: {}",
                        parameter.name
                    )));
                }
                template.parameters.push(parameter);
            }
            "mapping" => {
                let (name, mapping) = parse_mapping(node)?;
                if template.mappings.contains_key(&name) {
                    return Err(TemplateError::Invalid(format!("duplicate mapping: {name}")));
                }
                template.mappings.insert(name, mapping);
            }
            "resource" => {
                let resource = parse_resource(node)?;
                if template.resource(&resource.id).is_some() {
                    return Err(TemplateError::Invalid(format!(
                        "duplicate resource: {}",
                        resource.id
                    )));
                }
                template.resources.push(resource);
            }
            "output" => {
                let output = parse_output(node)?;
                if template.outputs.iter().any(|o| o.name == output.name) {
                    return Err(TemplateError::Invalid(format!(
                        "duplicate output: {}",
                        output.name
                    )));
                }
                template.outputs.push(output);
            }
            _ => {
                // 不明なノードはスキップ
            }
        }
    }

    Ok(template)
}
