use colored::Colorize;
use stratus_engine::{Action, ApplyReport, ChangeEntry, ChangeSet, ReplaceOrder};

/// 変更計画を表示する
pub fn print_changeset(changeset: &ChangeSet) {
    println!();
    for entry in &changeset.entries {
        match entry.action {
            Action::Create => print_entry("+".green().bold(), entry),
            Action::Update => print_entry("~".yellow().bold(), entry),
            Action::Replace { order } => {
                let marker = match order {
                    ReplaceOrder::DeleteThenCreate => "-/+",
                    ReplaceOrder::CreateThenDelete => "+/-",
                };
                print_entry(marker.red().bold(), entry);
            }
            Action::Delete => {
                let resource_type = entry
                    .before
                    .as_ref()
                    .map(|r| r.resource_type.as_str())
                    .unwrap_or("?");
                println!(
                    "  {} {} ({})",
                    "-".red().bold(),
                    entry.resource_id.cyan(),
                    resource_type
                );
            }
            Action::NoOp => {}
        }
    }

    let summary = changeset.summary();
    if summary.no_change > 0 {
        println!();
        println!("  （変更なし: {}個）", summary.no_change);
    }
    println!();
    println!("計画: {}", summary.to_string().bold());
}

fn print_entry(marker: colored::ColoredString, entry: &ChangeEntry) {
    let resource_type = entry
        .desired
        .as_ref()
        .map(|d| d.resource_type.as_str())
        .unwrap_or("?");
    println!("  {} {} ({})", marker, entry.resource_id.cyan(), resource_type);

    let Some(desired) = &entry.desired else {
        return;
    };
    for name in &entry.changed_properties {
        match desired.properties.get(name) {
            Some(value) => println!("      {} = {}", name, value.to_string().cyan()),
            // テンプレートから消えたプロパティ
            None => println!("      {} = {}", name, "(削除)".yellow()),
        }
    }
}

/// 適用結果を表示する
pub fn print_report(report: &ApplyReport) {
    println!();
    for resource_id in &report.succeeded {
        println!("  {} {}", "✓".green(), resource_id.cyan());
    }
    for failed in &report.failed {
        println!(
            "  {} {} ({})",
            "✗".red().bold(),
            failed.resource_id.cyan(),
            failed.action
        );
        println!("      {}", failed.error.red());
    }
    for resource_id in &report.rolled_back {
        println!(
            "  {} {} {}",
            "⚠".yellow(),
            resource_id.cyan(),
            "をロールバックしました".yellow()
        );
    }

    if report.has_rollback_failures() {
        println!();
        println!("{}", "✗ ロールバックに失敗したリソースがあります".red().bold());
        println!("{}", "  手動対応が必要です:".red());
        for failure in &report.rollback_failures {
            println!(
                "    • {} ({}): {}",
                failure.resource_id.cyan(),
                failure.attempted,
                failure.error
            );
        }
    }

    if !report.outputs.is_empty() {
        println!();
        println!("{}", "アウトプット:".bold());
        for (name, value) in &report.outputs {
            println!("  {} = {}", name, value.to_string().cyan());
        }
    }

    println!();
    if report.is_success() {
        println!(
            "{}",
            format!(
                "✓ 適用が完了しました！（{}個のリソース、{}ms）",
                report.succeeded.len(),
                report.duration_ms
            )
            .green()
            .bold()
        );
    } else if report.aborted {
        println!("{}", "⚠ 適用は中断されました".yellow().bold());
    } else {
        println!("{}", "✗ 適用に失敗しました".red().bold());
    }
}
