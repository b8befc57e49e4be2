use crate::{commands, output};
use colored::Colorize;
use converge_cloud::{ResourceKind, discovery};
use std::collections::BTreeSet;

pub async fn handle(
    kind: ResourceKind,
    name: Option<&str>,
    regions: &[String],
) -> anyhow::Result<()> {
    let settings = commands::load_settings(regions)?;
    let reconciler = commands::build_reconciler(&settings, true).await;
    let unchecked = reconciler.check_auth().await?;
    output::print_region_failures(&unchecked);

    let skip: BTreeSet<&str> = unchecked.iter().map(|f| f.region.as_str()).collect();
    let clients = reconciler.clients().without(&skip);
    let result = discovery::discover(kind, &clients, settings.concurrency).await?;
    output::print_region_failures(&result.failures);

    let records: Vec<_> = result
        .records
        .iter()
        .filter(|r| name.is_none_or(|n| r.name == n))
        .collect();

    println!(
        "{} ({} 件)",
        format!("{} 一覧:", kind.label()).bold(),
        records.len()
    );
    output::print_records(&records);
    Ok(())
}
