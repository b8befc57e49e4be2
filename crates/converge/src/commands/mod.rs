pub mod apply;
pub mod list;
pub mod plan;
pub mod validate;

use anyhow::{Context, Result};
use colored::Colorize;
use converge_cloud::{ReconcileOptions, Reconciler};
use converge_cloud_aws::AwsClient;
use converge_config::Settings;

/// 設定を読み込み、--region の指定で上書きする
pub fn load_settings(regions: &[String]) -> Result<Settings> {
    let settings = Settings::load()
        .context("設定の読み込みに失敗しました")?
        .with_regions(regions);
    settings.validate()?;
    Ok(settings)
}

/// 設定された全リージョンの AWS クライアントを作成する
pub async fn build_reconciler(settings: &Settings, dry_run: bool) -> Reconciler {
    println!(
        "{} {}",
        "リージョン:".blue(),
        settings.regions.join(", ").cyan()
    );
    let clients = AwsClient::connect_all(&settings.regions).await;
    Reconciler::new(clients).with_options(ReconcileOptions {
        concurrency: settings.concurrency,
        dry_run,
        mutate_failed_regions: settings.mutate_failed_regions,
    })
}
