//! スタックの読み込みと共通オプション

use anyhow::Context;
use clap::Args;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use stratus_engine::StackContext;
use stratus_provider::ResourceProvider;
use stratus_provider_mem::MemProvider;
use stratus_template::{
    bind_parameters, find_project_root, parse_template_file, template_path, BoundParameters,
    Template,
};

/// スタックを指定する共通フラグ
#[derive(Args, Debug)]
pub struct StackOpts {
    /// テンプレートファイル（デフォルト: stratus.kdl を探索）
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// パラメータの上書き（繰り返し可）
    #[arg(short, long = "param", value_name = "KEY=VALUE")]
    pub param: Vec<String>,

    /// リージョン
    #[arg(long, env = "STRATUS_REGION", default_value = "local-1")]
    pub region: String,

    /// アカウントID
    #[arg(long = "account-id", env = "STRATUS_ACCOUNT_ID", default_value = "000000000000")]
    pub account_id: String,

    /// リソースプロバイダー
    #[arg(long, default_value = "memory")]
    pub provider: String,
}

/// パース・バインド済みのスタック一式。
pub struct LoadedStack {
    pub template: Template,
    pub parameters: BoundParameters,
    pub project_root: PathBuf,
    pub region: String,
    pub account_id: String,
}

impl LoadedStack {
    pub fn context(&self) -> StackContext<'_> {
        StackContext {
            template: &self.template,
            parameters: &self.parameters,
            region: &self.region,
            account_id: &self.account_id,
        }
    }
}

/// テンプレートを読み込み、パラメータをバインドする。
pub fn load(opts: &StackOpts) -> anyhow::Result<LoadedStack> {
    let (template_file, project_root) = match &opts.file {
        Some(path) => {
            let root = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."));
            (path.clone(), root)
        }
        None => {
            let root = find_project_root()?;
            let path = template_path(&root)
                .with_context(|| format!("テンプレートが見つかりません: {}", root.display()))?;
            (path, root)
        }
    };

    let template = parse_template_file(&template_file)
        .with_context(|| format!("テンプレートを読み込めません: {}", template_file.display()))?;
    tracing::debug!("Loaded template '{}' from {}", template.name, template_file.display());

    let overrides = parse_param_overrides(&opts.param)?;
    let parameters = bind_parameters(&template, &overrides)?;

    Ok(LoadedStack {
        template,
        parameters,
        project_root,
        region: opts.region.clone(),
        account_id: opts.account_id.clone(),
    })
}

/// `key=value` 形式のパラメータ指定を検証して分解する。
fn parse_param_overrides(params: &[String]) -> anyhow::Result<HashMap<String, String>> {
    let mut overrides = HashMap::new();
    for param in params {
        let Some((key, value)) = param.split_once('=') else {
            anyhow::bail!("パラメータは KEY=VALUE 形式で指定してください: '{param}'");
        };
        overrides.insert(key.to_string(), value.to_string());
    }
    Ok(overrides)
}

/// 名前からプロバイダーを生成する。
pub fn make_provider(name: &str) -> anyhow::Result<Arc<dyn ResourceProvider>> {
    match name {
        "memory" => Ok(Arc::new(MemProvider::new())),
        other => anyhow::bail!("未対応のプロバイダーです: '{other}'（利用可能: memory）"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_overrides_parsed() {
        let overrides = parse_param_overrides(&[
            "cidr=10.0.0.0/16".to_string(),
            "env=prod".to_string(),
        ])
        .unwrap();
        assert_eq!(overrides.get("cidr").map(String::as_str), Some("10.0.0.0/16"));
        assert_eq!(overrides.get("env").map(String::as_str), Some("prod"));
    }

    #[test]
    fn test_malformed_param_rejected() {
        let err = parse_param_overrides(&["cidr".to_string()]).unwrap_err();
        assert!(err.to_string().contains("KEY=VALUE"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        assert!(make_provider("memory").is_ok());
        assert!(make_provider("aws").is_err());
    }
}
