pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 設定ファイルのパスを直接指定する環境変数
pub const CONFIG_ENV: &str = "CONVERGE_CONFIG";
/// リージョン一覧を上書きする環境変数 (カンマ区切り)
pub const REGIONS_ENV: &str = "CONVERGE_REGIONS";
/// リージョン未設定時のフォールバック
pub const AWS_REGION_ENV: &str = "AWS_REGION";

pub use converge_cloud::reconcile::DEFAULT_CONCURRENCY;

const CANDIDATES: [&str; 2] = ["converge.local.yaml", "converge.yaml"];

/// 実行時設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// 探索・変更対象のリージョン
    pub regions: Vec<String>,
    /// リージョン探索の同時実行数
    pub concurrency: usize,
    /// 探索に失敗したリージョンでも変更を実行するか
    pub mutate_failed_regions: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            regions: Vec::new(),
            concurrency: DEFAULT_CONCURRENCY,
            mutate_failed_regions: false,
        }
    }
}

impl Settings {
    /// 設定ファイルを検索して読み込み、環境変数で上書きする
    ///
    /// 設定ファイルが無い場合はデフォルト値から始める。
    pub fn load() -> Result<Self> {
        let mut settings = match find_config_file()? {
            Some(path) => Self::load_from(&path)?,
            None => {
                tracing::debug!("No settings file found, using defaults");
                Self::default()
            }
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// 指定されたファイルから読み込む
    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::debug!("Loading settings from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// CONVERGE_REGIONS はリージョン一覧を置き換える。
    /// AWS_REGION はリージョンが一つも無い場合のみ使う。
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var(REGIONS_ENV) {
            let regions = split_regions(&value);
            if !regions.is_empty() {
                self.regions = regions;
            }
        }

        if self.regions.is_empty() {
            if let Ok(region) = std::env::var(AWS_REGION_ENV) {
                let region = region.trim();
                if !region.is_empty() {
                    self.regions = vec![region.to_string()];
                }
            }
        }
    }

    /// コマンドライン引数によるリージョンの上書き (空なら何もしない)
    pub fn with_regions(mut self, regions: &[String]) -> Self {
        let regions = normalize_regions(regions.iter().map(String::as_str));
        if !regions.is_empty() {
            self.regions = regions;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.regions.iter().all(|r| r.trim().is_empty()) {
            return Err(ConfigError::NoRegions);
        }
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency(self.concurrency));
        }
        Ok(())
    }
}

fn split_regions(value: &str) -> Vec<String> {
    normalize_regions(value.split(','))
}

/// 空要素を除き、順序を保ったまま重複を取り除く
fn normalize_regions<'a>(regions: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();
    for region in regions.map(str::trim).filter(|r| !r.is_empty()) {
        if !result.iter().any(|r| r == region) {
            result.push(region.to_string());
        }
    }
    result
}

/// グローバル設定ディレクトリ (~/.config/converge)
pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("converge"))
}

/// 設定ファイルを探す
///
/// 以下の優先順位で設定ファイルを検索:
/// 1. 環境変数 CONVERGE_CONFIG (直接パス指定)
/// 2. カレントディレクトリ: converge.local.yaml, converge.yaml
/// 3. ./.converge/ ディレクトリ内: 同様の順序
/// 4. ~/.config/converge/config.yaml (グローバル設定)
pub fn find_config_file() -> Result<Option<PathBuf>> {
    // 1. 環境変数で直接指定
    if let Ok(config_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(ConfigError::ConfigFileNotFound(path));
    }

    let current_dir = std::env::current_dir()?;

    // 2. カレントディレクトリで検索
    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(Some(path));
        }
    }

    // 3. ./.converge/ ディレクトリで検索
    let local_dir = current_dir.join(".converge");
    if local_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = local_dir.join(filename);
            if path.exists() {
                return Ok(Some(path));
            }
        }
    }

    // 4. グローバル設定ファイル
    if let Some(config_dir) = get_config_dir() {
        let global_config = config_dir.join("config.yaml");
        if global_config.exists() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}
