use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("CONVERGE_CONFIG で指定された設定ファイルが見つかりません: {}", .0.display())]
    ConfigFileNotFound(PathBuf),

    #[error("設定ファイルの解析に失敗しました ({}): {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error(
        "リージョンが設定されていません。以下のいずれかで指定してください:\n\
        - 設定ファイルの regions\n\
        - CONVERGE_REGIONS 環境変数 (カンマ区切り)\n\
        - AWS_REGION 環境変数\n\
        - --region オプション"
    )]
    NoRegions,

    #[error("concurrency は 1 以上である必要があります: {0}")]
    InvalidConcurrency(usize),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
