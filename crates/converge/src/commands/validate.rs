use crate::manifest;
use colored::Colorize;
use std::path::Path;

pub fn handle(path: &Path) -> anyhow::Result<()> {
    let resources = manifest::load(path)?;
    println!(
        "{} {} 個のリソース宣言を確認しました",
        "✓".green(),
        resources.len()
    );
    for resource in &resources {
        println!(
            "  • {} {} ({}, {})",
            resource.kind,
            resource.name.cyan(),
            resource.region,
            resource.ensure
        );
    }
    Ok(())
}
