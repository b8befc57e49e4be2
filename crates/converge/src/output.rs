//! プラン・実行結果の表示

use colored::Colorize;
use converge_cloud::{Action, ApplyResult, CycleReport, LiveRecord, Plan, RegionFailure};

pub fn print_plan(plan: &Plan, verbose: bool) {
    println!("{}", "実行計画:".bold());

    for action in &plan.actions {
        let key = action.key();
        let target = format!("{} {} ({})", key.kind, key.name, key.region);
        match action {
            Action::Create { .. } => println!("  {} {}", "+".green().bold(), target.green()),
            Action::Destroy { .. } => println!("  {} {}", "-".red().bold(), target.red()),
            Action::Noop { .. } => {
                let updates = action.updatable_drift();
                let read_only = action.read_only_drift();
                if !updates.is_empty() {
                    println!("  {} {}", "~".yellow().bold(), target.yellow());
                    for drift in &updates {
                        println!("      {}", drift);
                    }
                }
                if !read_only.is_empty() {
                    println!(
                        "  {} {} {}",
                        "!".yellow(),
                        target,
                        "(変更できない属性が異なります)".dimmed()
                    );
                    for drift in &read_only {
                        println!("      {}", drift.to_string().dimmed());
                    }
                }
                if updates.is_empty() && read_only.is_empty() && verbose {
                    println!("  {} {}", "=".dimmed(), target.dimmed());
                }
            }
        }
    }

    for conflict in &plan.conflicts {
        println!("  {} {}", "✗".red().bold(), conflict.to_string().red());
    }

    println!();
    let summary = plan.summary().to_string();
    if plan.has_changes {
        println!("{}", summary.bold());
    } else {
        println!("{} ({})", "✓ 変更はありません".green(), summary);
    }
}

pub fn print_region_failures(failures: &[RegionFailure]) {
    for failure in failures {
        println!("  {} {}", "⚠".yellow(), failure.to_string().yellow());
    }
}

pub fn print_apply_result(result: &ApplyResult) {
    for ok in &result.succeeded {
        println!("  {} {}", "✓".green(), ok.message);
    }
    for failed in &result.failed {
        println!(
            "  {} {}: {}",
            "✗".red(),
            failed.action_id,
            failed.error.as_deref().unwrap_or("unknown error").red()
        );
    }
}

pub fn print_report(report: &CycleReport, verbose: bool) {
    if !report.region_failures.is_empty() {
        println!("{}", "探索に失敗したリージョン:".yellow().bold());
        print_region_failures(&report.region_failures);
        println!();
    }

    print_plan(&report.plan, verbose);

    if !report.apply.succeeded.is_empty() || !report.apply.failed.is_empty() {
        println!();
        println!("{}", "実行結果:".bold());
        print_apply_result(&report.apply);
    }

    println!();
    println!(
        "{} ({}ms)",
        format!(
            "{} 成功, {} 失敗",
            report.apply.succeeded.len(),
            report.apply.failed.len()
        )
        .bold(),
        report.duration_ms
    );
}

pub fn print_records(records: &[&LiveRecord]) {
    if records.is_empty() {
        println!("{}", "リソースが見つかりません".dimmed());
        return;
    }

    for record in records {
        let id = record
            .id
            .as_deref()
            .map(|id| format!(" [{}]", id))
            .unwrap_or_default();
        println!(
            "{} {}{} ({})",
            "•".cyan(),
            record.name.cyan().bold(),
            id.dimmed(),
            record.region
        );
        for (field, value) in &record.attributes {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            println!("    {}: {}", field, value);
        }
    }
}
