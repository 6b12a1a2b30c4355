use colored::Colorize;
use stratus_state::StateStore;
use stratus_template::find_project_root;

pub async fn handle(json: bool) -> anyhow::Result<()> {
    let root = find_project_root()?;
    let store = StateStore::open(&root).await?;

    let outputs = &store.state().outputs;

    if json {
        println!("{}", serde_json::to_string_pretty(outputs)?);
        return Ok(());
    }

    if outputs.is_empty() {
        println!("アウトプットはまだありません");
        println!(
            "{} を実行すると解決済みのアウトプットが保存されます",
            "stratus apply --yes".cyan()
        );
        return Ok(());
    }

    for (name, value) in outputs {
        println!("{} = {}", name.cyan(), value);
    }

    Ok(())
}
