use colored::Colorize;
use stratus_state::StateStore;
use stratus_template::find_project_root;

pub async fn handle_list() -> anyhow::Result<()> {
    let root = find_project_root()?;
    let store = StateStore::open(&root).await?;
    let state = store.state();

    if state.records.is_empty() {
        println!("ステートは空です。リソースはまだ作成されていません");
        return Ok(());
    }

    println!("{}", format!("リソース ({}個):", state.records.len()).bold());
    for (logical_id, record) in &state.records {
        println!(
            "  {} ({}) → {}",
            logical_id.cyan(),
            record.resource_type,
            record.physical_id.cyan()
        );
        if !record.dependencies.is_empty() {
            println!("      依存: {}", record.dependencies.join(", "));
        }
        println!(
            "      更新: {}",
            record.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }

    Ok(())
}
