use crate::stack::{self, StackOpts};
use crate::utils;
use colored::Colorize;
use stratus_engine::{Executor, ExecutorConfig, Graph, Planner, StackContext};
use stratus_provider::RetryConfig;
use stratus_state::StateStore;
use stratus_template::Template;

pub async fn handle(opts: &StackOpts, yes: bool, parallelism: usize) -> anyhow::Result<()> {
    let loaded = stack::load(opts)?;
    let provider = stack::make_provider(&opts.provider)?;
    let mut store = StateStore::open(&loaded.project_root).await?;

    println!("スタック: {}", loaded.template.name.cyan());

    // リソースのないテンプレートへ向けて計画すると、ステートにある
    // 全リソースが依存関係の逆順で削除になる
    let empty = Template {
        name: loaded.template.name.clone(),
        ..Default::default()
    };
    let ctx = StackContext {
        template: &empty,
        parameters: &loaded.parameters,
        region: &loaded.region,
        account_id: &loaded.account_id,
    };
    let graph = Graph::build(&empty)?;
    let changeset = Planner::new().plan(&graph, &ctx, store.state())?;

    if !changeset.has_changes() {
        println!("{}", "削除するリソースはありません".green());
        return Ok(());
    }

    utils::print_changeset(&changeset);

    if !yes {
        println!();
        println!(
            "{}",
            "⚠ 上記のリソースがすべて削除されます。この操作は取り消せません".yellow()
        );
        println!("実行するには --yes オプションを指定してください");
        return Ok(());
    }

    let lock = store.acquire_lock().await?;

    let (abort_tx, abort_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!("{}", "⚠ 中断シグナルを受信、ロールバックします...".yellow());
            let _ = abort_tx.send(true);
        }
    });

    println!();
    println!("{}", "リソースを削除中...".blue());

    let executor = Executor::with_config(
        provider,
        ExecutorConfig {
            parallelism,
            retry: RetryConfig::default(),
        },
    );
    let report = executor
        .apply(&changeset, &graph, &ctx, &mut store, abort_rx)
        .await?;

    utils::print_report(&report);

    lock.release().await?;

    if !report.is_success() {
        std::process::exit(1);
    }

    Ok(())
}
