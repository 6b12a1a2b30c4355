use crate::stack::{self, StackOpts};
use colored::Colorize;
use stratus_engine::Graph;

pub async fn handle(opts: &StackOpts) -> anyhow::Result<()> {
    println!("{}", "テンプレートを検証中...".blue());

    let loaded = match stack::load(opts) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ テンプレートエラー".red().bold());
            eprintln!("  {:#}", e);
            std::process::exit(1);
        }
    };

    // 参照の整合性と循環は依存グラフの構築で検出される
    let graph = match Graph::build(&loaded.template) {
        Ok(graph) => graph,
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ 依存関係エラー".red().bold());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    };

    println!("{}", "✓ テンプレートは正常です！".green().bold());
    println!();
    println!("サマリー:");
    println!("  スタック: {}", loaded.template.name.cyan());
    println!("  リソース: {}個", graph.len());
    for node in graph.topological_order() {
        if node.dependencies.is_empty() {
            println!("    - {} ({})", node.id.cyan(), node.resource_type);
        } else {
            println!(
                "    - {} ({}) ← {}",
                node.id.cyan(),
                node.resource_type,
                node.dependencies.join(", ")
            );
        }
    }
    if !loaded.template.parameters.is_empty() {
        println!("  パラメータ: {}個", loaded.template.parameters.len());
        for param in &loaded.template.parameters {
            let value = loaded
                .parameters
                .get(&param.name)
                .map(String::as_str)
                .unwrap_or("(未設定)");
            println!("    - {} = {}", param.name.cyan(), value);
        }
    }
    if !loaded.template.outputs.is_empty() {
        println!("  アウトプット: {}個", loaded.template.outputs.len());
        for output in &loaded.template.outputs {
            println!("    - {}", output.name.cyan());
        }
    }

    Ok(())
}
