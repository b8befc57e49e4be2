mod commands;
mod manifest;
mod output;

use clap::{Parser, Subcommand};
use converge_cloud::ResourceKind;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "converge")]
#[command(about = "宣言したとおりに、クラウドを収束させる。", long_about = None)]
struct Cli {
    /// 対象リージョン (複数指定可、設定ファイルと環境変数より優先)
    #[arg(long = "region", global = true)]
    regions: Vec<String>,

    /// 詳細ログを表示
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 現在の状態と宣言を比較し、実行計画を表示
    Plan {
        /// マニフェストファイル
        #[arg(short = 'f', long = "file", default_value = "resources.yaml")]
        file: PathBuf,
    },
    /// 実行計画を反映
    Apply {
        /// マニフェストファイル
        #[arg(short = 'f', long = "file", default_value = "resources.yaml")]
        file: PathBuf,
        /// 計画のみ表示して変更しない
        #[arg(long)]
        dry_run: bool,
    },
    /// 既存リソースの一覧を表示
    List {
        /// リソース種別 (vpc, subnet, internet_gateway, customer_gateway, vpn_gateway, vpn, launch_configuration)
        kind: ResourceKind,
        /// 名前で絞り込む
        #[arg(short = 'n', long)]
        name: Option<String>,
    },
    /// マニフェストを検証 (AWS には接続しない)
    Validate {
        /// マニフェストファイル
        #[arg(short = 'f', long = "file", default_value = "resources.yaml")]
        file: PathBuf,
    },
    /// バージョン情報を表示
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG が無ければ -v で debug、それ以外は info
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Version => {
            println!("converge {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Validate { file } => {
            commands::validate::handle(&file)?;
        }
        Commands::Plan { file } => {
            commands::plan::handle(&file, &cli.regions, cli.verbose).await?;
        }
        Commands::Apply { file, dry_run } => {
            commands::apply::handle(&file, &cli.regions, dry_run, cli.verbose).await?;
        }
        Commands::List { kind, name } => {
            commands::list::handle(kind, name.as_deref(), &cli.regions).await?;
        }
    }

    Ok(())
}
