mod commands;
mod stack;
mod utils;

use clap::{Parser, Subcommand};
use stack::StackOpts;

#[derive(Parser)]
#[command(name = "stratus")]
#[command(about = "宣言する。揃える。インフラは、テンプレートになった。", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// デモスタックの stratus.kdl を生成
    Init,
    /// テンプレートを検証（パース、パラメータ、依存グラフ）
    Validate {
        #[command(flatten)]
        opts: StackOpts,
    },
    /// 変更内容を計画して表示（適用はしない）
    Plan {
        #[command(flatten)]
        opts: StackOpts,
        /// 計画前にプロバイダーから属性を再取得する
        #[arg(long)]
        refresh: bool,
    },
    /// 変更を計画して適用
    Apply {
        #[command(flatten)]
        opts: StackOpts,
        /// 確認なしで適用する
        #[arg(short, long)]
        yes: bool,
        /// 同時に実行するプロバイダー操作数（1以上）
        #[arg(long, default_value_t = 4, value_parser = parallelism_parser())]
        parallelism: usize,
    },
    /// スタックの全リソースを削除
    Destroy {
        #[command(flatten)]
        opts: StackOpts,
        /// 確認なしで削除する
        #[arg(short, long)]
        yes: bool,
        /// 同時に実行するプロバイダー操作数（1以上）
        #[arg(long, default_value_t = 4, value_parser = parallelism_parser())]
        parallelism: usize,
    },
    /// 保存済みのスタック出力を表示
    Outputs {
        /// JSON形式で出力する
        #[arg(long)]
        json: bool,
    },
    /// ステートを操作
    State {
        #[command(subcommand)]
        command: StateCommands,
    },
    /// バージョンを表示
    Version,
}

#[derive(Subcommand)]
enum StateCommands {
    /// ステートレコードを一覧表示
    List,
}

// 同時実行数は1以上。0ではディスパッチが一度も起きない
fn parallelism_parser() -> clap::builder::RangedU64ValueParser<usize> {
    clap::builder::RangedU64ValueParser::new().range(1..)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    // Versionコマンドはテンプレート不要
    if matches!(cli.command, Commands::Version) {
        println!("stratus {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    match cli.command {
        Commands::Init => commands::init::handle().await?,
        Commands::Validate { opts } => commands::validate::handle(&opts).await?,
        Commands::Plan { opts, refresh } => commands::plan::handle(&opts, refresh).await?,
        Commands::Apply {
            opts,
            yes,
            parallelism,
        } => commands::apply::handle(&opts, yes, parallelism).await?,
        Commands::Destroy {
            opts,
            yes,
            parallelism,
        } => commands::destroy::handle(&opts, yes, parallelism).await?,
        Commands::Outputs { json } => commands::outputs::handle(json).await?,
        Commands::State { command } => match command {
            StateCommands::List => commands::state::handle_list().await?,
        },
        Commands::Version => unreachable!("Version is handled above"),
    }

    Ok(())
}
