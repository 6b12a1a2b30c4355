use crate::stack::{self, StackOpts};
use crate::utils;
use colored::Colorize;
use stratus_engine::{refresh_state, Graph, Planner};
use stratus_state::StateStore;

pub async fn handle(opts: &StackOpts, refresh: bool) -> anyhow::Result<()> {
    let loaded = stack::load(opts)?;
    let store = StateStore::open(&loaded.project_root).await?;

    println!("スタック: {}", loaded.template.name.cyan());

    let graph = Graph::build(&loaded.template)?;

    // 再取得はスナップショットに対して行い、ステートファイルには書き戻さない
    let mut snapshot = store.state().clone();
    if refresh {
        println!("{}", "プロバイダーから属性を再取得中...".blue());
        let provider = stack::make_provider(&opts.provider)?;
        for (id, error) in refresh_state(provider.as_ref(), &mut snapshot).await {
            eprintln!("  ⚠ {} を取得できません: {}", id.yellow(), error);
        }
    }

    let changeset = Planner::new().plan(&graph, &loaded.context(), &snapshot)?;

    if !changeset.has_changes() {
        println!(
            "{}",
            "変更はありません。ステートはテンプレートと一致しています。".green()
        );
        return Ok(());
    }

    utils::print_changeset(&changeset);
    println!();
    println!(
        "適用するには {} を実行してください",
        "stratus apply --yes".cyan()
    );

    Ok(())
}
