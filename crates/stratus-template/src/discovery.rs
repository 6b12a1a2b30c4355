//! プロジェクトルート検出
//!
//! 規約ベースでstratus.kdlを探します。

use crate::error::{Result, TemplateError};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// プロジェクトルートを検出
///
/// 以下の優先順位で検索:
/// 1. 環境変数 STRATUS_PROJECT_ROOT
/// 2. カレントディレクトリから上に向かって以下を探す:
///    - stratus.kdl
///    - .stratus/stratus.kdl
#[tracing::instrument]
pub fn find_project_root() -> Result<PathBuf> {
    // 1. 環境変数
    if let Ok(root) = std::env::var("STRATUS_PROJECT_ROOT") {
        let path = PathBuf::from(&root);
        debug!(env_root = %root, "Checking STRATUS_PROJECT_ROOT");
        if template_path(&path).is_some() {
            info!(project_root = %path.display(), "Found project root from environment variable");
            return Ok(path);
        }
    }

    // 2. カレントディレクトリから上に向かって探す
    let start_dir = std::env::current_dir()?;
    find_project_root_from(&start_dir)
}

/// 指定ディレクトリから上に向かってプロジェクトルートを探す
pub fn find_project_root_from(start_dir: &Path) -> Result<PathBuf> {
    let mut current = start_dir.to_path_buf();
    debug!(start_dir = %start_dir.display(), "Searching for project root");

    loop {
        debug!(checking = %current.display(), "Looking for stratus.kdl");
        if template_path(&current).is_some() {
            info!(project_root = %current.display(), "Found project root");
            return Ok(current);
        }

        // 親ディレクトリへ
        if !current.pop() {
            break;
        }
    }

    warn!(start_dir = %start_dir.display(), "Project root not found");
    Err(TemplateError::ProjectRootNotFound(start_dir.to_path_buf()))
}

/// ルート直下のテンプレートファイルのパスを返す
///
/// stratus.kdl が .stratus/stratus.kdl より優先される
pub fn template_path(project_root: &Path) -> Option<PathBuf> {
    let direct = project_root.join("stratus.kdl");
    if direct.exists() {
        return Some(direct);
    }
    let dotted = project_root.join(".stratus/stratus.kdl");
    if dotted.exists() {
        return Some(dotted);
    }
    None
}
