pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "QUICKBUILD_CONFIG_PATH";
pub const SUBSCRIPTION_ENV: &str = "QUICKBUILD_SUBSCRIPTION_ID";
pub const ACCESS_TOKEN_ENV: &str = "QUICKBUILD_ACCESS_TOKEN";
pub const MANAGEMENT_ENDPOINT_ENV: &str = "QUICKBUILD_MANAGEMENT_ENDPOINT";

const CANDIDATES: [&str; 2] = ["quickbuild.yaml", ".quickbuild.yaml"];

/// QuickBuild の設定
///
/// すべての項目にデフォルト値があり、設定ファイルは部分的に書けばよい。
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub management_endpoint: String,
    pub api_version: String,
    pub subscription_id: Option<String>,
    pub access_token: Option<String>,
    pub push: bool,
    pub keep_archive: bool,
    pub build_timeout_secs: Option<u32>,
    pub retry: RetrySettings,
    pub logs: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            management_endpoint: "https://management.azure.com".to_string(),
            api_version: "2018-02-01-preview".to_string(),
            subscription_id: None,
            access_token: None,
            push: true,
            keep_archive: false,
            build_timeout_secs: None,
            retry: RetrySettings::default(),
            logs: LogSettings::default(),
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("management_endpoint", &self.management_endpoint)
            .field("api_version", &self.api_version)
            .field("subscription_id", &self.subscription_id)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "<redacted>"),
            )
            .field("push", &self.push)
            .field("keep_archive", &self.keep_archive)
            .field("build_timeout_secs", &self.build_timeout_secs)
            .field("retry", &self.retry)
            .field("logs", &self.logs)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// ビルドが終了するまでログを追いかける
    pub follow: bool,
    pub poll_interval_ms: u64,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            follow: true,
            poll_interval_ms: 2000,
        }
    }
}

impl LogSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Settings {
    /// YAML ファイルから読み込む
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        // 空ファイルはデフォルト設定として扱う
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// 環境変数で上書き
    pub fn apply_env_overrides(&mut self) {
        if let Some(value) = non_empty_env(SUBSCRIPTION_ENV) {
            self.subscription_id = Some(value);
        }
        if let Some(value) = non_empty_env(ACCESS_TOKEN_ENV) {
            self.access_token = Some(value);
        }
        if let Some(value) = non_empty_env(MANAGEMENT_ENDPOINT_ENV) {
            self.management_endpoint = value;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.management_endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "management_endpoint は空にできません".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts は 1 以上にしてください".to_string(),
            ));
        }
        if self.retry.backoff_multiplier.is_nan() || self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry.backoff_multiplier は 1.0 以上にしてください: {}",
                self.retry.backoff_multiplier
            )));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.initial_delay_ms は retry.max_delay_ms 以下にしてください".to_string(),
            ));
        }
        if self.logs.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "logs.poll_interval_ms は 1 以上にしてください".to_string(),
            ));
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// QuickBuild のグローバル設定ディレクトリ
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("quickbuild");
    Ok(config_dir)
}

/// 設定ファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 QUICKBUILD_CONFIG_PATH (直接パス指定、存在しなければエラー)
/// 2. カレントディレクトリ: quickbuild.yaml, .quickbuild.yaml
/// 3. ~/.config/quickbuild/config.yaml (グローバル設定)
///
/// どこにもなければ `None`
pub fn find_config_file() -> Result<Option<PathBuf>> {
    // 1. 環境変数で直接指定
    if let Some(config_path) = non_empty_env(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.is_file() {
            return Ok(Some(path));
        }
        return Err(ConfigError::ConfigFileNotFound(path));
    }

    // 2. カレントディレクトリで検索
    let current_dir = std::env::current_dir()?;
    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.is_file() {
            return Ok(Some(path));
        }
    }

    // 3. グローバル設定ファイル
    if let Ok(config_dir) = get_config_dir() {
        let global_config = config_dir.join("config.yaml");
        if global_config.is_file() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}

/// 設定を読み込み、環境変数を反映して検証する
pub fn load_settings() -> Result<Settings> {
    let mut settings = match find_config_file()? {
        Some(path) => {
            tracing::debug!("Loading settings from {}", path.display());
            Settings::from_file(&path)?
        }
        None => {
            tracing::debug!("No settings file found, using defaults");
            Settings::default()
        }
    };

    settings.apply_env_overrides();
    settings.validate()?;
    Ok(settings)
}
