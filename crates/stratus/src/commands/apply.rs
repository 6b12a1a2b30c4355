use crate::stack::{self, StackOpts};
use crate::utils;
use colored::Colorize;
use stratus_engine::{Executor, ExecutorConfig, Graph, Planner};
use stratus_provider::RetryConfig;
use stratus_state::StateStore;

pub async fn handle(opts: &StackOpts, yes: bool, parallelism: usize) -> anyhow::Result<()> {
    let loaded = stack::load(opts)?;
    let provider = stack::make_provider(&opts.provider)?;
    let mut store = StateStore::open(&loaded.project_root).await?;

    println!("スタック: {}", loaded.template.name.cyan());

    let graph = Graph::build(&loaded.template)?;
    let ctx = loaded.context();
    let changeset = Planner::new().plan(&graph, &ctx, store.state())?;

    if !changeset.has_changes() {
        println!(
            "{}",
            "変更はありません。ステートはテンプレートと一致しています。".green()
        );
        return Ok(());
    }

    utils::print_changeset(&changeset);

    if !yes {
        println!();
        println!("{}", "⚠ この計画はまだ適用されていません".yellow());
        println!("実行するには --yes オプションを指定してください");
        return Ok(());
    }

    // ロックは確認ゲートの後で取得する
    let lock = store.acquire_lock().await?;

    // Ctrl-C で中断シグナルを送る。実行中の操作は完了を待ってから
    // ロールバックされる。
    let (abort_tx, abort_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!("{}", "⚠ 中断シグナルを受信、ロールバックします...".yellow());
            let _ = abort_tx.send(true);
        }
    });

    println!();
    println!("{}", "変更を適用中...".blue());

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
