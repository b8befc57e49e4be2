use crate::{commands, manifest, output};
use colored::Colorize;
use std::path::Path;

pub async fn handle(path: &Path, regions: &[String], verbose: bool) -> anyhow::Result<()> {
    let declared = manifest::load(path)?;
    let settings = commands::load_settings(regions)?;

    println!("{}", "現在の状態を取得中...".blue());
    let reconciler = commands::build_reconciler(&settings, true).await;
    let report = reconciler.run(&declared).await?;

    println!();
    if !report.region_failures.is_empty() {
        println!("{}", "探索に失敗したリージョン:".yellow().bold());
        output::print_region_failures(&report.region_failures);
        println!();
    }
    output::print_plan(&report.plan, verbose);
    Ok(())
}
