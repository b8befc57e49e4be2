use crate::{commands, manifest, output};
use colored::Colorize;
use std::path::Path;

pub async fn handle(
    path: &Path,
    regions: &[String],
    dry_run: bool,
    verbose: bool,
) -> anyhow::Result<()> {
    let declared = manifest::load(path)?;
    let settings = commands::load_settings(regions)?;

    println!("{}", "リソースを反映します...".blue().bold());
    let reconciler = commands::build_reconciler(&settings, dry_run).await;
    let report = reconciler.run(&declared).await?;

    println!();
    output::print_report(&report, verbose);

    if dry_run {
        println!("{}", "--dry-run のため変更は行っていません".yellow());
        return Ok(());
    }

    if !report.is_success() {
        anyhow::bail!(
            "{} 件のアクションが失敗しました ({} リージョンで探索失敗, {} 件の競合)",
            report.apply.failed.len(),
            report.region_failures.len(),
            report.plan.conflicts.len()
        );
    }

    println!("{}", "✓ すべてのリソースが宣言どおりです".green().bold());
    Ok(())
}
