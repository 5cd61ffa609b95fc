use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ディレクトリが見つかりません")]
    ConfigDirNotFound,

    #[error(
        "設定ファイルが見つかりません: {}\n\
        QUICKBUILD_CONFIG_PATH 環境変数の値を確認してください",
        .0.display()
    )]
    ConfigFileNotFound(PathBuf),

    #[error("設定ファイルの解析に失敗しました ({}): {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("設定値が不正です: {0}")]
    Invalid(String),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
